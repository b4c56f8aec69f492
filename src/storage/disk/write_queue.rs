//! Per-page FIFO admission for pending writes.
//!
//! Each page id with outstanding writes owns one queue. A page id is handed to
//! the worker pool exactly when its queue goes from empty to non-empty, and a
//! worker only ever writes the queue head, so at most one device write per page
//! is in flight and writes land in the order they were scheduled. Queues are
//! reaped as soon as they drain.

use std::collections::VecDeque;

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::oneshot;

use crate::storage::page::PageId;

use super::scheduler::WriteStatus;

/// Immutable snapshot of a page taken when the write was scheduled.
pub struct WriteRequest {
    pub page_id: PageId,
    pub data: Bytes,
    done: oneshot::Sender<WriteStatus>,
}

impl WriteRequest {
    pub fn new(page_id: PageId, data: Bytes, done: oneshot::Sender<WriteStatus>) -> Self {
        Self {
            page_id,
            data,
            done,
        }
    }

    pub fn complete(self, status: WriteStatus) {
        // The ticket may have been dropped by a fire-and-forget caller
        let _ = self.done.send(status);
    }
}

#[derive(Default)]
struct PageQueue {
    requests: VecDeque<WriteRequest>,
    // A worker is writing the head
    in_flight: bool,
    // The page was deleted while its head was in flight
    forgotten: bool,
}

/// How a page's queue ended when its last request completed.
pub enum Drained<'a> {
    /// Data of the last write for a live page.
    Latest(&'a Bytes),
    /// The page was forgotten while its final write was on the device.
    Forgotten,
}

#[derive(Default)]
pub struct WriteQueues {
    queues: DashMap<PageId, PageQueue>,
}

impl WriteQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request. Returns true when the page was idle and must now be
    /// put on the ready queue.
    ///
    /// A page that was forgotten takes no new writes; the request is handed
    /// back untouched.
    pub fn push(&self, request: WriteRequest) -> Result<bool, WriteRequest> {
        let mut queue = self.queues.entry(request.page_id).or_default();
        if queue.forgotten {
            return Err(request);
        }
        let was_idle = queue.requests.is_empty();
        queue.requests.push_back(request);
        Ok(was_idle)
    }

    /// Marks the head as in flight and returns the data a worker should write.
    pub fn begin_head(&self, page_id: PageId) -> Option<Bytes> {
        let mut queue = self.queues.get_mut(&page_id)?;
        let data = queue.requests.front()?.data.clone();
        queue.in_flight = true;
        Some(data)
    }

    /// Data of the most recently scheduled write.
    pub fn latest(&self, page_id: PageId) -> Option<Bytes> {
        self.queues
            .get(&page_id)
            .filter(|queue| !queue.forgotten)
            .and_then(|queue| queue.requests.back().map(|request| request.data.clone()))
    }

    /// Pops the head once its device write finished.
    ///
    /// Returns the request and whether more requests remain for the page.
    /// When the queue drains, `on_drained` runs before the queue is reaped,
    /// while the entry is still locked.
    pub fn complete_head(
        &self,
        page_id: PageId,
        on_drained: impl FnOnce(Drained<'_>),
    ) -> Option<(WriteRequest, bool)> {
        match self.queues.entry(page_id) {
            Entry::Vacant(_) => None,
            Entry::Occupied(mut entry) => {
                let queue = entry.get_mut();
                let request = queue.requests.pop_front()?;
                queue.in_flight = false;
                if queue.requests.is_empty() {
                    if queue.forgotten {
                        on_drained(Drained::Forgotten);
                    } else {
                        on_drained(Drained::Latest(&request.data));
                    }
                    entry.remove();
                    Some((request, false))
                } else {
                    Some((request, true))
                }
            }
        }
    }

    /// Removes the requests no worker has picked up yet.
    ///
    /// A head that is in flight stays with its worker. With `forget` set the
    /// page also stops taking new writes until that head completes.
    pub fn take_queued(&self, page_id: PageId, forget: bool) -> Vec<WriteRequest> {
        match self.queues.entry(page_id) {
            Entry::Vacant(_) => Vec::new(),
            Entry::Occupied(mut entry) => {
                let queue = entry.get_mut();
                if queue.in_flight {
                    queue.forgotten |= forget;
                    queue.requests.drain(1..).collect()
                } else {
                    entry.remove().requests.into_iter().collect()
                }
            }
        }
    }

    /// Removes every pending request. Only sound once no worker is running.
    pub fn drain(&self) -> Vec<WriteRequest> {
        let page_ids: Vec<PageId> = self.queues.iter().map(|entry| *entry.key()).collect();
        page_ids
            .into_iter()
            .filter_map(|page_id| self.queues.remove(&page_id))
            .flat_map(|(_, queue)| queue.requests)
            .collect()
    }

    /// True while a deleted page's last write is still on the device.
    pub fn is_forgotten(&self, page_id: PageId) -> bool {
        self.queues
            .get(&page_id)
            .is_some_and(|queue| queue.forgotten)
    }

    pub fn pending(&self) -> usize {
        self.queues.iter().map(|entry| entry.value().requests.len()).sum()
    }

    pub fn is_idle(&self, page_id: PageId) -> bool {
        !self.queues.contains_key(&page_id)
    }
}

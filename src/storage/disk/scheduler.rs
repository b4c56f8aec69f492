use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    thread::JoinHandle,
};

use bytes::Bytes;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use dashmap::DashMap;
use hashlink::LruCache;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, info, trace, warn};

use super::{
    manager::DiskManager,
    write_queue::{Drained, WriteQueues, WriteRequest},
};
use crate::{
    error::DiskError,
    storage::page::{page_constants::PAGE_SIZE, PageId},
};

/// Final state of a scheduled write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    // The device rejected the write. It is not retried.
    WriteError,
    // The scheduler shut down before the write was performed
    Abandoned,
}

/// Completion handle for one scheduled write.
///
/// Dropping the ticket does not cancel the write. It can be waited on from a
/// plain thread with [`WriteTicket::wait`] or awaited as a future.
#[must_use = "dropping a ticket does not cancel the write, but its status is lost"]
pub struct WriteTicket {
    rx: oneshot::Receiver<WriteStatus>,
}

impl WriteTicket {
    pub(crate) fn abandoned() -> Self {
        let (_, rx) = oneshot::channel();
        Self { rx }
    }

    /// Blocks until the write finished. Must not be called from inside an
    /// async runtime; await the ticket instead.
    pub fn wait(self) -> WriteStatus {
        self.rx.blocking_recv().unwrap_or(WriteStatus::Abandoned)
    }

    /// Status if the write already finished. Only reports a given status once.
    pub fn try_status(&mut self) -> Option<WriteStatus> {
        match self.rx.try_recv() {
            Ok(status) => Some(status),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(WriteStatus::Abandoned),
        }
    }
}

impl Future for WriteTicket {
    type Output = WriteStatus;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|status| status.unwrap_or(WriteStatus::Abandoned))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub device_writes: u64,
    pub failed_writes: u64,
    pub device_reads: u64,
    // Reads answered from a pending write or the latest-known-good cache
    pub cached_reads: u64,
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    device_writes: AtomicU64,
    failed_writes: AtomicU64,
    device_reads: AtomicU64,
    cached_reads: AtomicU64,
}

struct SchedulerInner {
    disk_manager: Arc<dyn DiskManager>,
    queues: WriteQueues,
    // Latest data known to have left the queues, per page
    cache: Mutex<LruCache<PageId, Bytes>>,
    // Pages whose last write failed, kept until a later write succeeds
    failed: DashMap<PageId, Bytes>,
    stop: AtomicBool,
    counters: Counters,
    // Signalled whenever a request leaves the queues
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl SchedulerInner {
    /// Writes the head of `page_id`'s queue. Returns true when more writes for
    /// the page are pending and it must go back on the ready queue.
    fn write_head(&self, page_id: PageId) -> bool {
        let Some(data) = self.queues.begin_head(page_id) else {
            return false;
        };

        let status = match self.disk_manager.write_page(page_id, &data) {
            Ok(()) => {
                self.counters.device_writes.fetch_add(1, Ordering::Relaxed);
                trace!(page_id, "page written");
                WriteStatus::Success
            }
            Err(err) => {
                self.counters.failed_writes.fetch_add(1, Ordering::Relaxed);
                error!(page_id, error = %err, "write-back failed");
                WriteStatus::WriteError
            }
        };

        // The cache is filled before the queue is reaped so a reader never
        // sees neither.
        let completed = self.queues.complete_head(page_id, |end| match end {
            Drained::Latest(latest) => {
                if status == WriteStatus::Success {
                    self.failed.remove(&page_id);
                } else {
                    self.failed.insert(page_id, latest.clone());
                }
                self.cache.lock().insert(page_id, latest.clone());
            }
            Drained::Forgotten => {
                // Deleted mid-write, so the copy that just landed goes too
                if let Err(err) = self.disk_manager.deallocate_page(page_id) {
                    warn!(page_id, error = %err, "failed to deallocate forgotten page");
                }
            }
        });

        let more = match completed {
            Some((request, more)) => {
                request.complete(status);
                more
            }
            None => false,
        };
        self.notify_progress();
        more
    }

    /// Blocks while a deleted page's final write is still being undone.
    fn wait_forgotten(&self, page_id: PageId) {
        let mut guard = self.idle_lock.lock();
        while self.queues.is_forgotten(page_id) {
            self.idle.wait(&mut guard);
        }
    }

    fn notify_progress(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }
}

/// Asynchronous write-back with per-page ordering.
///
/// Writes for one page are performed in the order they were scheduled, never
/// more than one at a time. Writes for different pages run in parallel on a
/// fixed pool of worker threads.
pub struct DiskScheduler {
    inner: Arc<SchedulerInner>,
    ready_tx: Sender<PageId>,
    // Dropped on shutdown, which disconnects every worker's receiver
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<dyn DiskManager>, workers: usize, cache_capacity: usize) -> Self {
        let inner = Arc::new(SchedulerInner {
            disk_manager,
            queues: WriteQueues::new(),
            cache: Mutex::new(LruCache::new(cache_capacity.max(1))),
            failed: DashMap::new(),
            stop: AtomicBool::new(false),
            counters: Counters::default(),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        });

        let (ready_tx, ready_rx) = unbounded::<PageId>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for worker_id in 0..workers.max(1) {
            let inner = Arc::clone(&inner);
            let ready_tx = ready_tx.clone();
            let ready_rx = ready_rx.clone();
            let shutdown_rx = shutdown_rx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("geode-writeback-{worker_id}"))
                .spawn(move || Self::worker_loop(inner, ready_tx, ready_rx, shutdown_rx));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(worker_id, error = %err, "failed to spawn write-back worker"),
            }
        }

        info!(
            workers = handles.len(),
            cache_capacity, "disk scheduler started"
        );

        Self {
            inner,
            ready_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(handles),
        }
    }

    fn worker_loop(
        inner: Arc<SchedulerInner>,
        ready_tx: Sender<PageId>,
        ready_rx: Receiver<PageId>,
        shutdown_rx: Receiver<()>,
    ) {
        loop {
            let page_id = select! {
                recv(shutdown_rx) -> _ => break,
                recv(ready_rx) -> msg => match msg {
                    Ok(page_id) => page_id,
                    Err(_) => break,
                },
            };

            if inner.stop.load(Ordering::Acquire) {
                break;
            }

            if inner.write_head(page_id) && ready_tx.send(page_id).is_err() {
                break;
            }
        }
    }

    /// Snapshots `data` and queues it behind any pending writes for the page.
    ///
    /// Never blocks on I/O. After shutdown the write is dropped and the ticket
    /// resolves to [`WriteStatus::Abandoned`].
    pub fn schedule_write(&self, page_id: PageId, data: &[u8]) -> WriteTicket {
        if self.inner.stop.load(Ordering::Acquire) {
            warn!(page_id, "write scheduled after shutdown, dropping it");
            return WriteTicket::abandoned();
        }

        let (tx, rx) = oneshot::channel();
        let request = WriteRequest::new(page_id, Bytes::copy_from_slice(data), tx);
        self.inner.counters.scheduled.fetch_add(1, Ordering::Relaxed);

        match self.inner.queues.push(request) {
            Ok(true) => {
                debug!(page_id, "page queued for write-back");
                // Only fails once the workers are gone
                let _ = self.ready_tx.send(page_id);
            }
            Ok(false) => {}
            Err(request) => {
                debug!(page_id, "write for forgotten page dropped");
                request.complete(WriteStatus::Abandoned);
            }
        }

        // Lost a race with shutdown: nobody will drain this queue any more.
        // A head already on the device is left to its worker.
        if self.inner.stop.load(Ordering::Acquire) {
            let abandoned = self.inner.queues.take_queued(page_id, false);
            if !abandoned.is_empty() {
                for request in abandoned {
                    request.complete(WriteStatus::Abandoned);
                }
                self.inner.notify_progress();
            }
        }

        WriteTicket { rx }
    }

    /// Fills `page_data` with the newest known contents of `page_id`.
    ///
    /// The most recently scheduled write wins, then the latest-known-good
    /// cache, then a page whose last write failed, then the device.
    pub fn read(&self, page_id: PageId, page_data: &mut [u8]) -> Result<(), DiskError> {
        if page_data.len() != PAGE_SIZE {
            return Err(DiskError::BufferSize(page_data.len()));
        }

        self.inner.wait_forgotten(page_id);

        if let Some(latest) = self.inner.queues.latest(page_id) {
            page_data.copy_from_slice(&latest);
            self.inner.counters.cached_reads.fetch_add(1, Ordering::Relaxed);
            trace!(page_id, "read served from pending write");
            return Ok(());
        }

        let cached = self.inner.cache.lock().get(&page_id).cloned();
        if let Some(cached) = cached {
            page_data.copy_from_slice(&cached);
            self.inner.counters.cached_reads.fetch_add(1, Ordering::Relaxed);
            trace!(page_id, "read served from cache");
            return Ok(());
        }

        let failed = self.inner.failed.get(&page_id).map(|data| data.value().clone());
        if let Some(failed) = failed {
            page_data.copy_from_slice(&failed);
            self.inner.counters.cached_reads.fetch_add(1, Ordering::Relaxed);
            error!(page_id, "read served from a write the device rejected");
            return Ok(());
        }

        self.inner.disk_manager.read_page(page_id, page_data)?;
        self.inner.counters.device_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Discards everything the scheduler holds for a deleted page.
    ///
    /// Queued writes resolve to [`WriteStatus::Abandoned`] and the cached copy
    /// is dropped. A write already on the device finishes, after which the
    /// worker deallocates the page again and does not cache it.
    pub fn forget(&self, page_id: PageId) {
        let abandoned = self.inner.queues.take_queued(page_id, true);
        self.inner.cache.lock().remove(&page_id);
        self.inner.failed.remove(&page_id);

        if !abandoned.is_empty() {
            debug!(page_id, count = abandoned.len(), "dropping writes for deleted page");
            for request in abandoned {
                request.complete(WriteStatus::Abandoned);
            }
            self.inner.notify_progress();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            scheduled: counters.scheduled.load(Ordering::Relaxed),
            device_writes: counters.device_writes.load(Ordering::Relaxed),
            failed_writes: counters.failed_writes.load(Ordering::Relaxed),
            device_reads: counters.device_reads.load(Ordering::Relaxed),
            cached_reads: counters.cached_reads.load(Ordering::Relaxed),
            pending: self.inner.queues.pending(),
        }
    }

    /// Blocks until every write scheduled so far has left the queues.
    pub fn wait_idle(&self) {
        let mut guard = self.inner.idle_lock.lock();
        while self.inner.queues.pending() > 0 {
            self.inner.idle.wait(&mut guard);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    pub fn disk_manager(&self) -> &Arc<dyn DiskManager> {
        &self.inner.disk_manager
    }

    /// Stops the workers and abandons every write still queued.
    ///
    /// A write already handed to the device completes first. Calling this more
    /// than once is harmless.
    pub fn shutdown(&self) {
        if self.inner.stop.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown_tx.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("write-back worker panicked");
            }
        }

        let abandoned = self.inner.queues.drain();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "abandoning pending writes");
        }
        for request in abandoned {
            request.complete(WriteStatus::Abandoned);
        }
        self.inner.notify_progress();

        info!("disk scheduler stopped");
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

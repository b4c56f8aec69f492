use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::{
    buffer::{BufferPoolManager, FrameHeader},
    storage::disk::WriteTicket,
};

use super::PageId;

/// Keeps a page pinned. Unpins it exactly once, on drop or `release`.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    // None once the pin has been handed off or released
    frame: Option<&'a FrameHeader>,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: &'a FrameHeader) -> Self {
        Self {
            bpm,
            frame: Some(frame),
            page_id: frame.page_id(),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Passes the dirty flag to the pool on release.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Runs `f` under a short shared latch.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self.frame {
            Some(frame) => f(&frame.read()[..]),
            None => f(&[]),
        }
    }

    /// Runs `f` under a short exclusive latch and marks the page dirty.
    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.is_dirty = true;
        match self.frame {
            Some(frame) => f(&mut frame.write()[..]),
            None => f(&mut []),
        }
    }

    /// Takes the shared latch without giving up the pin.
    pub fn upgrade_read(mut self) -> ReadPageGuard<'a> {
        let frame = self.frame.take();
        ReadPageGuard {
            latch: frame.map(|frame| frame.read()),
            guard: BasicPageGuard {
                bpm: self.bpm,
                frame,
                page_id: self.page_id,
                is_dirty: self.is_dirty,
            },
        }
    }

    /// Takes the exclusive latch without giving up the pin.
    pub fn upgrade_write(mut self) -> WritePageGuard<'a> {
        let frame = self.frame.take();
        WritePageGuard {
            latch: frame.map(|frame| frame.write()),
            guard: BasicPageGuard {
                bpm: self.bpm,
                frame,
                page_id: self.page_id,
                is_dirty: self.is_dirty,
            },
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        if self.frame.take().is_some() && !self.bpm.unpin_page(self.page_id, self.is_dirty) {
            warn!(page_id = self.page_id, "page guard released an unpinned page");
        }
    }
}

/// Pinned page under a shared latch.
pub struct ReadPageGuard<'a> {
    latch: Option<RwLockReadGuard<'a, Box<[u8]>>>,
    guard: BasicPageGuard<'a>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.latch {
            Some(data) => &data[..],
            None => &[],
        }
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Unlatch before the inner guard unpins
        self.latch.take();
    }
}

/// Pinned page under an exclusive latch. Mutable access marks it dirty.
pub struct WritePageGuard<'a> {
    latch: Option<RwLockWriteGuard<'a, Box<[u8]>>>,
    guard: BasicPageGuard<'a>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn is_dirty(&self) -> bool {
        self.guard.is_dirty
    }

    /// Queues the current bytes for write-back without giving up the latch.
    pub fn flush(&mut self) -> WriteTicket {
        match (&self.latch, self.guard.frame) {
            (Some(data), Some(frame)) => {
                self.guard.is_dirty = false;
                self.guard.bpm.flush_latched(frame, data)
            }
            _ => WriteTicket::abandoned(),
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.latch {
            Some(data) => &data[..],
            None => &[],
        }
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.guard.is_dirty = true;
        match &mut self.latch {
            Some(data) => &mut data[..],
            None => &mut [],
        }
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.latch.take();
    }
}

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::page::{page_constants::INVALID_PAGE_ID, zeroed_page, FrameId, PageId};

/// One slot of the buffer pool.
///
/// Metadata is only changed while the pool latch is held; the atomics let it
/// be read without the latch. The page bytes sit behind the frame's own
/// reader-writer latch, which is independent of pinning.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: RwLock<Box<[u8]>>,
}

impl FrameHeader {
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(zeroed_page()),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Page held by the frame, `INVALID_PAGE_ID` while it is free.
    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Shared latch on the page bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Exclusive latch on the page bytes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    // Snapshot for write-back. Does not queue behind a waiting writer, so a
    // thread already holding a shared latch on the page cannot deadlock.
    pub(crate) fn read_recursive(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read_recursive()
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    /// Returns the pin count after incrementing.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the pin count after decrementing. Callers check for zero first.
    pub(crate) fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn set_pin_count(&self, pin_count: u32) {
        self.pin_count.store(pin_count, Ordering::Release);
    }

    pub(crate) fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    pub(crate) fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Returns the frame to the free state with zeroed bytes.
    pub(crate) fn reset(&self) {
        self.data.write().fill(0);
        self.set_page_id(INVALID_PAGE_ID);
        self.set_pin_count(0);
        self.clear_dirty();
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

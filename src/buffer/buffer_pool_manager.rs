use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::frame::FrameHeader;
use crate::{
    config::BufferPoolOptions,
    error::{BufferPoolError, OptionsError, Result},
    storage::{
        disk::{DiskManager, DiskScheduler, SchedulerStats, WriteStatus, WriteTicket},
        page::{BasicPageGuard, FrameId, PageId, ReadPageGuard, WritePageGuard},
    },
    utils::replacer::{AccessType, LRUKReplacer, Replacer},
};

// Everything the pool latch protects besides frame metadata
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
}

/// Caches pages of a storage device in a fixed number of frames.
///
/// Page table, free list, pin counts and dirty flags change under one short
/// pool latch. The replacer locks itself. Dirty pages are written back through
/// the [`DiskScheduler`], which never blocks the caller.
pub struct BufferPoolManager {
    pool_size: usize,
    next_page_id: AtomicU32,

    // Allocated once, never reallocated
    frames: Box<[FrameHeader]>,

    // Only pushed and popped while the pool latch is held
    free_list: ArrayQueue<FrameId>,

    latch: Mutex<PoolState>,

    // Finds unpinned frames to evict
    replacer: LRUKReplacer<FrameId>,

    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<dyn DiskManager>, replacer_k: usize) -> Self {
        Self::build(BufferPoolOptions::new(pool_size, replacer_k), disk_manager)
    }

    pub fn with_options(
        options: BufferPoolOptions,
        disk_manager: Arc<dyn DiskManager>,
    ) -> std::result::Result<Self, OptionsError> {
        options.validate()?;
        Ok(Self::build(options, disk_manager))
    }

    fn build(options: BufferPoolOptions, disk_manager: Arc<dyn DiskManager>) -> Self {
        let pool_size = options.pool_size;

        let frames: Box<[FrameHeader]> = (0..pool_size)
            .map(|frame_id| FrameHeader::new(frame_id as FrameId))
            .collect();

        let free_list = ArrayQueue::new(pool_size.max(1));
        for frame_id in 0..pool_size {
            let _ = free_list.push(frame_id as FrameId);
        }

        let next_page_id = AtomicU32::new(disk_manager.page_count());

        Self {
            pool_size,
            next_page_id,
            frames,
            free_list,
            latch: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
            }),
            replacer: LRUKReplacer::new(pool_size, options.replacer_k),
            disk_scheduler: DiskScheduler::new(
                disk_manager,
                options.write_workers,
                options.cache_capacity,
            ),
        }
    }

    /// Allocates a page id and pins a zeroed frame for it.
    ///
    /// The frame reference is only meaningful until the matching
    /// [`unpin_page`](Self::unpin_page); callers outside the crate go through
    /// [`new_page_guarded`](Self::new_page_guarded).
    pub(crate) fn new_page(&self) -> Result<(PageId, &FrameHeader)> {
        let mut state = self.latch.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id as usize];
        frame.write().fill(0);

        let page_id = self.next_page_id.fetch_add(1, Ordering::Relaxed);
        self.install(&mut state, frame, page_id, AccessType::Unknown);

        debug!(page_id, frame_id, "allocated page");
        Ok((page_id, frame))
    }

    pub(crate) fn fetch_page(&self, page_id: PageId) -> Result<&FrameHeader> {
        self.fetch_page_with_access(page_id, AccessType::Unknown)
    }

    /// Pins `page_id`, reading it in if it is not resident.
    ///
    /// Blocks on a miss until the bytes are available, either from the
    /// scheduler's pending writes and cache or from the device.
    pub(crate) fn fetch_page_with_access(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<&FrameHeader> {
        let mut state = self.latch.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            frame.pin();
            self.track_access(frame_id, access_type);
            trace!(page_id, frame_id, "page table hit");
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id as usize];

        let read = {
            let mut data = frame.write();
            self.disk_scheduler.read(page_id, &mut data)
        };

        if let Err(err) = read {
            error!(page_id, error = %err, "failed to read page");
            frame.reset();
            self.release_frame(frame_id);
            return Err(err.into());
        }

        self.install(&mut state, frame, page_id, access_type);
        trace!(page_id, frame_id, "page read in");
        Ok(frame)
    }

    /// Drops one pin. `is_dirty` is sticky: it can set the flag, never clear it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.latch.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id as usize];

        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == 0 {
            self.set_evictable(frame_id, true);
        }
        true
    }

    /// Schedules a write-back of the page and clears its dirty flag. Does not
    /// wait for the device.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        self.schedule_flush(page_id).is_some()
    }

    /// Like [`flush_page`](Self::flush_page) but blocks until the device write
    /// finished. Must not be called from inside an async runtime.
    pub fn flush_page_sync(&self, page_id: PageId) -> Result<bool> {
        match self.schedule_flush(page_id) {
            None => Ok(false),
            Some(ticket) => check_status(page_id, ticket.wait()).map(|_| true),
        }
    }

    pub async fn flush_page_async(&self, page_id: PageId) -> Result<bool> {
        match self.schedule_flush(page_id) {
            None => Ok(false),
            Some(ticket) => check_status(page_id, ticket.await).map(|_| true),
        }
    }

    pub fn flush_all_pages(&self) {
        for page_id in self.resident_pages() {
            self.flush_page(page_id);
        }
    }

    /// Flushes every resident page and waits for all of the writes.
    pub fn flush_all_pages_sync(&self) -> Result<()> {
        let tickets: Vec<(PageId, WriteTicket)> = self
            .resident_pages()
            .into_iter()
            .filter_map(|page_id| Some((page_id, self.schedule_flush(page_id)?)))
            .collect();

        let mut first_err = None;
        for (page_id, ticket) in tickets {
            if let Err(err) = check_status(page_id, ticket.wait()) {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Evicts an unpinned page and deallocates it. Pages that are not resident
    /// count as deleted; pinned pages are left untouched.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.latch.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id as usize];

        if frame.pin_count() > 0 {
            debug!(page_id, pin_count = frame.pin_count(), "refusing to delete pinned page");
            return false;
        }

        state.page_table.remove(&page_id);
        if let Err(err) = self.replacer.remove(frame_id) {
            error!(page_id, frame_id, error = %err, "replacer out of sync with pin count");
        }
        frame.reset();
        self.release_frame(frame_id);

        // Queued write-backs are dropped first. One already on the device is
        // deallocated again by its worker once it lands.
        self.disk_scheduler.forget(page_id);
        if let Err(err) = self.disk_scheduler.disk_manager().deallocate_page(page_id) {
            warn!(page_id, error = %err, "failed to deallocate page");
        }

        debug!(page_id, frame_id, "deleted page");
        true
    }

    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self, frame))
    }

    /// Like [`fetch_page_basic`](Self::fetch_page_basic), but reports the
    /// access to the replacer as `access_type`.
    pub fn fetch_page_basic_with_access(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<BasicPageGuard<'_>> {
        let frame = self.fetch_page_with_access(page_id, access_type)?;
        Ok(BasicPageGuard::new(self, frame))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self, frame).upgrade_read())
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self, frame).upgrade_write())
    }

    pub fn new_page_guarded(&self) -> Result<BasicPageGuard<'_>> {
        let (_, frame) = self.new_page()?;
        Ok(BasicPageGuard::new(self, frame))
    }

    /// Flushes everything synchronously, waits for earlier write-backs of
    /// evicted pages, then stops the write-back workers.
    pub fn close(&self) -> Result<()> {
        let flushed = self.flush_all_pages_sync();
        if !self.disk_scheduler.is_shut_down() {
            self.disk_scheduler.wait_idle();
        }
        self.disk_scheduler.shutdown();
        flushed
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.latch.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id as usize].pin_count())
    }

    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.latch.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id as usize].is_dirty())
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.disk_scheduler.stats()
    }

    /// Queues the bytes of a page whose exclusive latch the caller holds.
    pub(crate) fn flush_latched(&self, frame: &FrameHeader, data: &[u8]) -> WriteTicket {
        {
            let _state = self.latch.lock();
            frame.clear_dirty();
        }
        self.disk_scheduler.schedule_write(frame.page_id(), data)
    }

    /// Free frame if there is one, otherwise the replacer's victim. A dirty
    /// victim is queued for write-back before the frame is handed out.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.pop() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            warn!(pool_size = self.pool_size, "buffer pool exhausted");
            return Err(BufferPoolError::PoolExhausted(self.pool_size));
        };

        let frame = &self.frames[frame_id as usize];
        let victim = frame.page_id();

        if frame.is_dirty() {
            let data = frame.read();
            let _ = self.disk_scheduler.schedule_write(victim, &data);
            debug!(page_id = victim, frame_id, "evicting dirty page");
        } else {
            debug!(page_id = victim, frame_id, "evicting clean page");
        }

        state.page_table.remove(&victim);
        frame.clear_dirty();
        Ok(frame_id)
    }

    fn install(
        &self,
        state: &mut PoolState,
        frame: &FrameHeader,
        page_id: PageId,
        access_type: AccessType,
    ) {
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        frame.clear_dirty();
        state.page_table.insert(page_id, frame.frame_id());
        self.track_access(frame.frame_id(), access_type);
    }

    fn track_access(&self, frame_id: FrameId, access_type: AccessType) {
        if let Err(err) = self.replacer.record_access(frame_id, access_type) {
            error!(frame_id, error = %err, "replacer rejected access");
        }
        self.set_evictable(frame_id, false);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if let Err(err) = self.replacer.set_evictable(frame_id, evictable) {
            error!(frame_id, evictable, error = %err, "replacer rejected evictability change");
        }
    }

    fn release_frame(&self, frame_id: FrameId) {
        if self.free_list.push(frame_id).is_err() {
            error!(frame_id, "free list overflow");
        }
    }

    fn resident_pages(&self) -> Vec<PageId> {
        self.latch.lock().page_table.keys().copied().collect()
    }

    /// Pins the page while its bytes are snapshotted so the frame cannot be
    /// reassigned mid-copy. Returns `None` when the page is not resident.
    fn schedule_flush(&self, page_id: PageId) -> Option<WriteTicket> {
        let frame = {
            let state = self.latch.lock();
            let &frame_id = state.page_table.get(&page_id)?;
            let frame = &self.frames[frame_id as usize];
            if frame.pin() == 1 {
                self.set_evictable(frame_id, false);
            }
            frame.clear_dirty();
            frame
        };

        let ticket = {
            let data = frame.read_recursive();
            self.disk_scheduler.schedule_write(page_id, &data)
        };

        {
            let _state = self.latch.lock();
            if frame.unpin() == 0 {
                self.set_evictable(frame.frame_id(), true);
            }
        }

        trace!(page_id, "flush scheduled");
        Some(ticket)
    }
}

fn check_status(page_id: PageId, status: WriteStatus) -> Result<()> {
    match status {
        WriteStatus::Success => Ok(()),
        WriteStatus::WriteError => Err(BufferPoolError::WriteFailed(page_id)),
        WriteStatus::Abandoned => Err(BufferPoolError::ShutDown),
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        let dirty = self.frames.iter().filter(|frame| frame.is_dirty()).count();
        if dirty > 0 && !self.disk_scheduler.is_shut_down() {
            warn!(dirty, "dropping buffer pool with dirty pages, call close() to persist them");
        }
        self.disk_scheduler.shutdown();
    }
}

mod page_guard_test;

use std::{thread, time::Duration};

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::{
    error::DiskError,
    storage::{
        disk::{DiskManager, MemoryDiskManager},
        page::PageId,
    },
};

/// Installs a subscriber once per test binary. `RUST_LOG` overrides the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// In-memory device that logs `(page_id, first byte)` for every write and can
/// be slowed down or told to fail writes to one page.
#[derive(Default)]
pub struct RecordingDisk {
    inner: MemoryDiskManager,
    writes: Mutex<Vec<(PageId, u8)>>,
    delay: Duration,
    failing_page: Option<PageId>,
}

impl RecordingDisk {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(page_id: PageId) -> Self {
        Self {
            failing_page: Some(page_id),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<(PageId, u8)> {
        self.writes.lock().clone()
    }

    pub fn writes_for(&self, page_id: PageId) -> Vec<u8> {
        self.writes
            .lock()
            .iter()
            .filter(|(id, _)| *id == page_id)
            .map(|(_, byte)| *byte)
            .collect()
    }

    pub fn snapshot(&self, page_id: PageId) -> Option<Box<[u8]>> {
        self.inner.snapshot(page_id)
    }
}

impl DiskManager for RecordingDisk {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8]) -> Result<(), DiskError> {
        self.inner.read_page(page_id, page_data)
    }

    fn write_page(&self, page_id: PageId, page_data: &[u8]) -> Result<(), DiskError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.failing_page == Some(page_id) {
            return Err(DiskError::Io {
                page_id,
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            });
        }

        self.inner.write_page(page_id, page_data)?;
        self.writes.lock().push((page_id, page_data[0]));
        Ok(())
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskError> {
        self.inner.deallocate_page(page_id)
    }

    fn page_count(&self) -> PageId {
        self.inner.page_count()
    }
}

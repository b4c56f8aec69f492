use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::Context;
use dashmap::{DashMap, DashSet};

use crate::{
    error::DiskError,
    storage::page::{page_constants::PAGE_SIZE, zeroed_page, PageId},
};

/// A block device addressed by page id. Both calls are synchronous; the
/// write-back scheduler is the only component that calls `write_page`.
pub trait DiskManager: Send + Sync {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8]) -> Result<(), DiskError>;

    fn write_page(&self, page_id: PageId, page_data: &[u8]) -> Result<(), DiskError>;

    fn deallocate_page(&self, _page_id: PageId) -> Result<(), DiskError> {
        Ok(())
    }

    // Pages already present on the device. New page ids start here.
    fn page_count(&self) -> PageId {
        0
    }
}

fn check_len(page_data: &[u8]) -> Result<(), DiskError> {
    if page_data.len() != PAGE_SIZE {
        return Err(DiskError::BufferSize(page_data.len()));
    }
    Ok(())
}

/// Single database file, page `p` stored at offset `p * PAGE_SIZE`.
pub struct FileDiskManager {
    file: File,
    path: PathBuf,
    // Deallocated pages are never handed out again
    deallocated: DashSet<PageId>,
    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl FileDiskManager {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open database file {}", path.display()))?;

        Ok(Self {
            file,
            path,
            deallocated: DashSet::new(),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&self) -> anyhow::Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("failed to sync {}", self.path.display()))
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    fn file_len(&self, page_id: PageId) -> Result<u64, DiskError> {
        self.file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|source| DiskError::Io { page_id, source })
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8]) -> Result<(), DiskError> {
        check_len(page_data)?;
        if self.deallocated.contains(&page_id) {
            return Err(DiskError::Deallocated(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let len = self.file_len(page_id)?;

        // Pages that were allocated but never written read back as zeros
        let available = len.saturating_sub(offset).min(PAGE_SIZE as u64) as usize;
        if available > 0 {
            self.file
                .read_exact_at(&mut page_data[..available], offset)
                .map_err(|source| DiskError::Io { page_id, source })?;
        }
        page_data[available..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page_data: &[u8]) -> Result<(), DiskError> {
        check_len(page_data)?;

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file
            .write_all_at(page_data, offset)
            .map_err(|source| DiskError::Io { page_id, source })?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskError> {
        self.deallocated.insert(page_id);
        Ok(())
    }

    fn page_count(&self) -> PageId {
        let len = self.file.metadata().map(|meta| meta.len()).unwrap_or(0);
        len.div_ceil(PAGE_SIZE as u64) as PageId
    }
}

/// Device kept entirely in memory. Unwritten pages read back as zeros.
#[derive(Default)]
pub struct MemoryDiskManager {
    pages: DashMap<PageId, Box<[u8]>>,
    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl MemoryDiskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Copy of what the device currently stores for `page_id`.
    pub fn snapshot(&self, page_id: PageId) -> Option<Box<[u8]>> {
        self.pages.get(&page_id).map(|page| page.value().clone())
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8]) -> Result<(), DiskError> {
        check_len(page_data)?;

        match self.pages.get(&page_id) {
            Some(page) => page_data.copy_from_slice(page.value()),
            None => page_data.fill(0),
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page_data: &[u8]) -> Result<(), DiskError> {
        check_len(page_data)?;

        self.pages
            .entry(page_id)
            .or_insert_with(zeroed_page)
            .copy_from_slice(page_data);

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskError> {
        self.pages.remove(&page_id);
        Ok(())
    }

    fn page_count(&self) -> PageId {
        self.pages
            .iter()
            .map(|page| *page.key() + 1)
            .max()
            .unwrap_or(0)
    }
}

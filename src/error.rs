use thiserror::Error;

use crate::storage::page::PageId;

/// Failures surfaced by the buffer pool manager.
#[derive(Error, Debug)]
pub enum BufferPoolError {
    // Every frame is pinned and the replacer has no victim
    #[error("buffer pool exhausted: all {0} frames are pinned")]
    PoolExhausted(usize),

    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    // The device rejected a write the caller waited on
    #[error("write-back of page {0} failed")]
    WriteFailed(PageId),

    #[error("write-back scheduler has been shut down")]
    ShutDown,
}

/// Failures reported by a storage device.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("I/O error on page {page_id}: {source}")]
    Io {
        page_id: PageId,
        #[source]
        source: std::io::Error,
    },

    #[error("buffer of {0} bytes does not match the page size")]
    BufferSize(usize),

    #[error("page {0} has been deallocated")]
    Deallocated(PageId),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReplacerError {
    #[error("replacer is tracking its maximum of {0} entries")]
    CapacityExceeded(usize),

    #[error("remove called on a non-evictable entry")]
    NotEvictable,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, BufferPoolError>;

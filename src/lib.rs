//! Page cache for a disk-based storage engine.
//!
//! A [`BufferPoolManager`] keeps a fixed number of page frames in memory,
//! evicts with an LRU-K policy and writes dirty pages back through an
//! asynchronous [`DiskScheduler`] that preserves per-page write order.

pub mod buffer;
pub mod config;
pub mod error;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod tests;

pub use buffer::{BufferPoolManager, FrameHeader};
pub use config::BufferPoolOptions;
pub use error::{BufferPoolError, DiskError, ReplacerError, Result};
pub use storage::{
    disk::{
        DiskManager, DiskScheduler, FileDiskManager, MemoryDiskManager, WriteStatus, WriteTicket,
    },
    page::{
        page_constants::{INVALID_PAGE_ID, PAGE_SIZE},
        BasicPageGuard, FrameId, PageId, ReadPageGuard, WritePageGuard,
    },
};
pub use utils::replacer::{AccessType, LRUKReplacer, Replacer};

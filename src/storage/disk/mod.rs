pub mod manager;
pub mod scheduler;
pub mod write_queue;

pub use manager::{DiskManager, FileDiskManager, MemoryDiskManager};
pub use scheduler::{DiskScheduler, SchedulerStats, WriteStatus, WriteTicket};

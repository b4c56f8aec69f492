pub mod buffer_pool_manager;
pub mod frame;

pub use buffer_pool_manager::BufferPoolManager;
pub use frame::FrameHeader;

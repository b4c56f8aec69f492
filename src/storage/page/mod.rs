pub mod page;
pub mod page_guard;

pub use page::{page_constants, zeroed_page, FrameId, PageId};
pub use page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};

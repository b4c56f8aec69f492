pub type FrameId = u32;
pub type PageId = u32;

pub mod page_constants {
    use super::PageId;

    // Size of every frame, device block and write request
    pub const PAGE_SIZE: usize = 1024 * 4;

    pub const INVALID_PAGE_ID: PageId = PageId::MAX;
}

/// Allocates a zeroed page-sized buffer.
pub fn zeroed_page() -> Box<[u8]> {
    vec![0u8; page_constants::PAGE_SIZE].into_boxed_slice()
}

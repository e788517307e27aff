pub type PageId = u32;

pub mod page_constants {
    pub const PAGE_SIZE: usize = 4096;
}

pub mod memory;
pub mod opensearch;

pub use memory::MemoryStore;
pub use opensearch::OpenSearchStore;

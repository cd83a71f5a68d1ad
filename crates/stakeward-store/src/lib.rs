pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

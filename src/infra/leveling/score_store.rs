// Store implementations for the rank system.

pub mod in_memory;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryScoreStore;
pub use sqlite_store::SqliteScoreStore;

mod kv;
mod sqlite;

pub use kv::{KeyValueStore, MemoryStore, StoreError};
pub use sqlite::SqliteStore;

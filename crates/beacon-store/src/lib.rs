pub mod database;
pub mod kv;
pub mod memory;
pub mod schema;

pub use beacon_core::errors::StoreError;
pub use database::Database;
pub use kv::SqliteStore;
pub use memory::MemoryStore;

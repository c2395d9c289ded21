pub mod api;
pub mod error;
mod in_memory;
pub mod keys;

pub use api::{KvStore, WriteBatch};
pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use keys::DbPrefix;

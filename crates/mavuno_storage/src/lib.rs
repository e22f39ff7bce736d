//! # Mavuno Storage
//!
//! Persistent key-value store facility for the Mavuno sync engine.
//!
//! Stores are **opaque string maps** - they do not interpret the values
//! they hold. The sync engine owns the layout (one key holding the whole
//! mutation queue, one key per cached response).
//!
//! ## Design Principles
//!
//! - Stores are simple string maps (set, get, remove, list keys)
//! - All operations are async so no blocking I/O runs on the caller's task
//! - Must be `Send + Sync` so one store can back several engine components
//! - Removing a key that does not exist is not an error
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - One file per key inside a directory
//!
//! ## Example
//!
//! ```rust
//! use mavuno_storage::{InMemoryStore, KeyValueStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryStore::new();
//! store.set_item("syncQueue", "[]".to_string()).await.unwrap();
//! assert_eq!(store.get_item("syncQueue").await.unwrap().as_deref(), Some("[]"));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::KeyValueStore;

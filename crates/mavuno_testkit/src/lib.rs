//! # Mavuno Testkit
//!
//! Test utilities for the Mavuno sync engine.
//!
//! This crate provides:
//! - An engine fixture wired to a scripted transport and a manual clock
//! - A store wrapper that rejects reads or writes on demand
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mavuno_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn queues_offline_writes() {
//!     let engine = TestEngine::memory().await;
//!     engine.go_offline();
//!     let _ = engine.request("/orders", Method::Post, None).await;
//!     assert_eq!(engine.pending_operations().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use mavuno_sync_engine::{
        FlushReport, Method, RequestOptions, RequestOutcome, SyncConfig, SyncError, SyncEvent,
        TransportError,
    };
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;

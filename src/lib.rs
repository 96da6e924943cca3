//! # Sequent
//!
//! Watches a fixed set of documents in an external document store, turns
//! every committed change into field-level change records, and journals them
//! under a contiguous, replayable sequence index.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: in-memory last-applied body of each watched document
//! - **Diff**: pure comparison of old body vs new body into change records
//! - **Sequence log**: durable, monotonically increasing index over change
//!   batches, persisted as one versioning document in the store
//! - **Replay**: "what changed since index N?" without re-reading the store
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sequent::{DocId, DocumentStore, Engine, EngineConfig, MemoryStore, SeqIndex};
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = Engine::initialize(store.clone(), EngineConfig {
//!     watchlist: vec![DocId::new("settings"), DocId::new("profile")],
//!     ..Default::default()
//! })?;
//!
//! // ... documents change in the store ...
//!
//! for entry in engine.changes_since(SeqIndex::ZERO)? {
//!     println!("#{} {}: {} field(s)", entry.index, entry.doc_id, entry.changes.len());
//! }
//! ```

pub mod consumer;
pub mod diff;
pub mod engine;
pub mod error;
pub mod replay;
pub mod sequence;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-exports
pub use consumer::FeedConsumer;
pub use diff::diff;
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, Result};
pub use replay::ReplayService;
pub use sequence::{SequenceLog, DEFAULT_APPEND_RETRIES};
pub use snapshot::SnapshotStore;
pub use store::{
    DocumentStore, FeedEvent, FeedPredicate, FeedSubscription, MemoryStore, SubscriptionId,
};
pub use types::*;

//! Document store collaborator contract.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{Cursor, DocId, DocumentBody, Revision};
use crossbeam_channel::Receiver;

/// Filter applied to feed events before delivery.
pub type FeedPredicate = Box<dyn Fn(&DocId) -> bool + Send + Sync>;

/// A committed change delivered by the store's feed, in commit order.
#[derive(Clone, Debug)]
pub struct FeedEvent {
    pub doc_id: DocId,
    /// Revision committed by this change; absent for deletions.
    pub revision: Option<Revision>,
    pub cursor: Cursor,
    pub deleted: bool,
}

/// Unique identifier for a feed subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to a live change feed.
pub struct FeedSubscription {
    pub id: SubscriptionId,
    /// Channel of committed changes. Disconnects on unsubscribe.
    pub receiver: Receiver<FeedEvent>,
}

/// Contract the engine requires from the external document store.
///
/// Writes use optimistic concurrency: a `put` whose body carries a stale
/// `_rev` fails with `Conflict`, which is how the engine's read-modify-write
/// loop on the versioning document detects a concurrent writer. The feed
/// delivers committed changes in commit order; subscribing at a cursor
/// replays everything committed after it before streaming live, so a
/// restarted consumer resumes without gaps or duplicates.
pub trait DocumentStore: Send + Sync {
    /// Point read, optionally at a specific revision. `Ok(None)` means the
    /// document (or that revision of it) does not exist.
    fn get(&self, id: &DocId, rev: Option<&Revision>) -> Result<Option<DocumentBody>>;

    /// Upsert. The body's `_rev` must match the current revision, or be
    /// absent when creating. Returns the newly committed revision.
    fn put(&self, id: &DocId, body: DocumentBody) -> Result<Revision>;

    /// Overlay `patch` onto the current body (creating the document if
    /// missing) and commit the result.
    fn merge(&self, id: &DocId, patch: DocumentBody) -> Result<Revision>;

    /// Delete the document. The feed reports the deletion.
    fn delete(&self, id: &DocId) -> Result<()>;

    /// Cursor positioned before any committed change.
    fn initial_cursor(&self) -> Cursor;

    /// Subscribe to committed changes with cursor greater than `since`,
    /// filtered by `predicate`.
    fn subscribe(&self, since: Cursor, predicate: FeedPredicate) -> Result<FeedSubscription>;

    /// Tear down a subscription; its channel disconnects.
    fn unsubscribe(&self, id: SubscriptionId);
}

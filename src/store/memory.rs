//! In-memory document store with revisioned documents and a change feed.
//!
//! Behaves like a single-node CouchDB as far as the engine cares: optimistic
//! concurrency on writes, point reads at historical revisions, and a change
//! feed that replays committed events to late subscribers. Used by the test
//! suite and available to embedders who want an in-process store.

use crate::error::{EngineError, Result};
use crate::store::{DocumentStore, FeedEvent, FeedPredicate, FeedSubscription, SubscriptionId};
use crate::types::{Cursor, DocId, DocumentBody, Revision};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Feed buffer per subscriber. Subscribers that fall this far behind are
/// dropped, as in any bounded broadcast.
const FEED_BUFFER: usize = 1024;

struct StoredDoc {
    generation: u64,
    revision: Revision,
    body: DocumentBody,
}

struct Subscriber {
    predicate: FeedPredicate,
    sender: Sender<FeedEvent>,
}

#[derive(Default)]
struct Feed {
    log: Vec<FeedEvent>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// Planned failures for exercising error paths in tests.
#[derive(Default)]
struct FailurePlan {
    gets: u32,
    puts: u32,
    conflicts: u32,
}

/// In-memory `DocumentStore` implementation.
pub struct MemoryStore {
    docs: RwLock<HashMap<DocId, StoredDoc>>,
    /// Superseded revisions, kept so reads at an old revision still resolve.
    history: RwLock<HashMap<DocId, Vec<(Revision, DocumentBody)>>>,
    feed: Mutex<Feed>,
    next_subscription: AtomicU64,
    failures: Mutex<FailurePlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            feed: Mutex::new(Feed::default()),
            next_subscription: AtomicU64::new(1),
            failures: Mutex::new(FailurePlan::default()),
        }
    }

    /// Fail the next `n` reads with `StoreUnavailable`.
    pub fn fail_gets(&self, n: u32) {
        self.failures.lock().gets = n;
    }

    /// Fail the next `n` writes with `StoreUnavailable`.
    pub fn fail_puts(&self, n: u32) {
        self.failures.lock().puts = n;
    }

    /// Fail the next `n` writes with `Conflict`, regardless of revision.
    pub fn inject_conflicts(&self, n: u32) {
        self.failures.lock().conflicts = n;
    }

    /// Number of committed feed events so far.
    pub fn committed_cursor(&self) -> Cursor {
        Cursor(self.feed.lock().log.len() as u64)
    }

    fn check_read_failure(&self) -> Result<()> {
        let mut failures = self.failures.lock();
        if failures.gets > 0 {
            failures.gets -= 1;
            return Err(EngineError::StoreUnavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write_failure(&self, id: &DocId) -> Result<()> {
        let mut failures = self.failures.lock();
        if failures.conflicts > 0 {
            failures.conflicts -= 1;
            return Err(EngineError::Conflict(id.clone()));
        }
        if failures.puts > 0 {
            failures.puts -= 1;
            return Err(EngineError::StoreUnavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn revision_for(generation: u64, body: &DocumentBody) -> Result<Revision> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(body)?);
        let digest = hex::encode(hasher.finalize());
        Ok(Revision(format!("{}-{}", generation, &digest[..16])))
    }

    /// Commit `body` as the new current revision of `id` and broadcast the
    /// change. Assumes the conflict check already passed.
    fn commit(
        &self,
        docs: &mut HashMap<DocId, StoredDoc>,
        id: &DocId,
        mut body: DocumentBody,
    ) -> Result<Revision> {
        body.remove("_id");
        body.remove("_rev");

        let generation = docs.get(id).map(|d| d.generation + 1).unwrap_or(1);
        let revision = Self::revision_for(generation, &body)?;

        if let Some(previous) = docs.get(id) {
            self.history
                .write()
                .entry(id.clone())
                .or_default()
                .push((previous.revision.clone(), previous.body.clone()));
        }

        body.insert("_id".into(), Value::String(id.0.clone()));
        body.insert("_rev".into(), Value::String(revision.0.clone()));
        docs.insert(
            id.clone(),
            StoredDoc {
                generation,
                revision: revision.clone(),
                body,
            },
        );

        self.broadcast(id.clone(), Some(revision.clone()), false);
        Ok(revision)
    }

    /// Append to the feed log and fan out to live subscribers. Held under the
    /// feed lock so commit order and delivery order agree.
    fn broadcast(&self, doc_id: DocId, revision: Option<Revision>, deleted: bool) {
        let mut feed = self.feed.lock();
        let cursor = Cursor(feed.log.len() as u64 + 1);
        let event = FeedEvent {
            doc_id,
            revision,
            cursor,
            deleted,
        };
        feed.log.push(event.clone());

        let mut dropped = Vec::new();
        for (id, subscriber) in feed.subscribers.iter() {
            if (subscriber.predicate)(&event.doc_id) && subscriber.sender.try_send(event.clone()).is_err()
            {
                dropped.push(*id);
            }
        }
        for id in dropped {
            feed.subscribers.remove(&id);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &DocId, rev: Option<&Revision>) -> Result<Option<DocumentBody>> {
        self.check_read_failure()?;

        let docs = self.docs.read();
        match rev {
            None => Ok(docs.get(id).map(|d| d.body.clone())),
            Some(rev) => {
                if let Some(doc) = docs.get(id) {
                    if &doc.revision == rev {
                        return Ok(Some(doc.body.clone()));
                    }
                }
                let history = self.history.read();
                Ok(history.get(id).and_then(|revisions| {
                    revisions
                        .iter()
                        .find(|(r, _)| r == rev)
                        .map(|(_, body)| body.clone())
                }))
            }
        }
    }

    fn put(&self, id: &DocId, body: DocumentBody) -> Result<Revision> {
        self.check_write_failure(id)?;

        let mut docs = self.docs.write();
        let supplied = body.get("_rev").and_then(Value::as_str);
        match docs.get(id) {
            Some(doc) if supplied != Some(doc.revision.0.as_str()) => {
                return Err(EngineError::Conflict(id.clone()));
            }
            None if supplied.is_some() => {
                return Err(EngineError::Conflict(id.clone()));
            }
            _ => {}
        }

        self.commit(&mut docs, id, body)
    }

    fn merge(&self, id: &DocId, patch: DocumentBody) -> Result<Revision> {
        self.check_write_failure(id)?;

        let mut docs = self.docs.write();
        let mut merged = docs.get(id).map(|d| d.body.clone()).unwrap_or_default();
        for (key, value) in patch {
            merged.insert(key, value);
        }

        self.commit(&mut docs, id, merged)
    }

    fn delete(&self, id: &DocId) -> Result<()> {
        self.check_write_failure(id)?;

        let mut docs = self.docs.write();
        if let Some(doc) = docs.remove(id) {
            self.history
                .write()
                .entry(id.clone())
                .or_default()
                .push((doc.revision, doc.body));
            self.broadcast(id.clone(), None, true);
        }
        Ok(())
    }

    fn initial_cursor(&self) -> Cursor {
        Cursor::ZERO
    }

    fn subscribe(&self, since: Cursor, predicate: FeedPredicate) -> Result<FeedSubscription> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(FEED_BUFFER);

        // Replay under the feed lock so no commit can slip between catch-up
        // and live delivery.
        let mut feed = self.feed.lock();
        for event in feed.log.iter() {
            if event.cursor > since && predicate(&event.doc_id) {
                let _ = sender.try_send(event.clone());
            }
        }
        feed.subscribers.insert(id, Subscriber { predicate, sender });

        Ok(FeedSubscription { id, receiver })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.feed.lock().subscribers.remove(&id);
    }
}

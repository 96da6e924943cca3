//! Feed consumer: applies watched change events strictly one at a time.
//!
//! Each event walks the same pipeline: fetch the current body, diff it
//! against the snapshot, append the resulting records to the sequence log,
//! then replace the snapshot entry. The next event is not touched until the
//! previous one has finished, which is what keeps index assignment race-free
//! without a lock around the snapshot.

use crate::diff::diff;
use crate::error::{EngineError, Result};
use crate::sequence::SequenceLog;
use crate::snapshot::SnapshotStore;
use crate::store::{DocumentStore, FeedEvent};
use crate::types::DocId;
use crossbeam_channel::{select, Receiver};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Single-worker pipeline from the store's change feed into the sequence log.
pub struct FeedConsumer {
    store: Arc<dyn DocumentStore>,
    log: Arc<SequenceLog>,
    snapshot: SnapshotStore,
    watchlist: HashSet<DocId>,
}

impl FeedConsumer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        log: Arc<SequenceLog>,
        snapshot: SnapshotStore,
        watchlist: Vec<DocId>,
    ) -> Self {
        Self {
            store,
            log,
            snapshot,
            watchlist: watchlist.into_iter().collect(),
        }
    }

    /// Drain events until the feed disconnects, shutdown is signalled, or a
    /// fatal error halts consumption. Returns the fatal error, if any.
    ///
    /// A failing event is never skipped: skipping would leave a gap in the
    /// sequence, so the consumer stalls instead and surfaces the error.
    pub fn run(mut self, feed: Receiver<FeedEvent>, shutdown: Receiver<()>) -> Option<EngineError> {
        loop {
            select! {
                recv(feed) -> event => match event {
                    Ok(event) => {
                        if let Err(err) = self.apply(&event) {
                            error!(doc = %event.doc_id, cursor = event.cursor.0, %err,
                                "halting feed consumption");
                            return Some(err);
                        }
                    }
                    Err(_) => return None,
                },
                recv(shutdown) -> _ => return None,
            }
        }
    }

    /// Apply a single change event: fetch, diff, append, update snapshot.
    fn apply(&mut self, event: &FeedEvent) -> Result<()> {
        if !self.watchlist.contains(&event.doc_id) {
            return Ok(());
        }

        let body = if event.deleted {
            None
        } else {
            self.store.get(&event.doc_id, event.revision.as_ref())?
        };

        let changes = diff(self.snapshot.get(&event.doc_id), body.as_ref());
        debug!(
            doc = %event.doc_id,
            cursor = event.cursor.0,
            records = changes.len(),
            "applying change event"
        );

        self.log.append(&event.doc_id, changes, event.cursor)?;

        // Replace the snapshot even when nothing changed, so the cached body
        // tracks the store's revision bookkeeping.
        match body {
            Some(body) => self.snapshot.set(event.doc_id.clone(), body),
            None => self.snapshot.remove(&event.doc_id),
        }

        Ok(())
    }
}

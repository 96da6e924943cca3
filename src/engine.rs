//! Engine wiring: bootstrap, initial snapshot, feed consumption, replay.

use crate::consumer::FeedConsumer;
use crate::error::{EngineError, Result};
use crate::replay::ReplayService;
use crate::sequence::{SequenceLog, DEFAULT_APPEND_RETRIES};
use crate::snapshot::SnapshotStore;
use crate::store::{DocumentStore, SubscriptionId};
use crate::types::{DocId, SeqIndex, SequenceEntry};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Id of the document the sequence log is persisted under.
    pub versioning_doc: DocId,

    /// Documents to track.
    pub watchlist: Vec<DocId>,

    /// Retry bound for conflicting writes to the versioning document.
    pub append_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            versioning_doc: DocId::new("sequences"),
            watchlist: Vec::new(),
            append_retries: DEFAULT_APPEND_RETRIES,
        }
    }
}

/// A running change-sequencing engine.
///
/// Owns all mutable state explicitly: the snapshot lives inside the worker,
/// the sequence head inside the log. No process-wide singletons, so
/// independent instances can run side by side in tests.
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    log: Arc<SequenceLog>,
    replay: ReplayService,
    subscription: SubscriptionId,
    shutdown: Sender<()>,
    worker: Option<JoinHandle<Option<EngineError>>>,
    fault: Arc<Mutex<Option<String>>>,
}

impl Engine {
    /// Bootstrap the sequence log, snapshot the watchlist, and begin feed
    /// consumption at the persisted cursor. Fails fatally if the store is
    /// unreachable.
    pub fn initialize(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Result<Self> {
        let log = Arc::new(SequenceLog::with_retry_limit(
            Arc::clone(&store),
            config.versioning_doc.clone(),
            config.append_retries,
        ));
        let (cursor, latest) = log.bootstrap()?;
        info!(
            cursor = cursor.0,
            latest = latest.0,
            watched = config.watchlist.len(),
            "sequence log bootstrapped"
        );

        let mut snapshot = SnapshotStore::new();
        snapshot.bootstrap_all(store.as_ref(), &config.watchlist)?;

        let watched: HashSet<DocId> = config.watchlist.iter().cloned().collect();
        let subscription =
            store.subscribe(cursor, Box::new(move |id| watched.contains(id)))?;
        let subscription_id = subscription.id;

        let consumer = FeedConsumer::new(
            Arc::clone(&store),
            Arc::clone(&log),
            snapshot,
            config.watchlist,
        );

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let fault = Arc::new(Mutex::new(None));

        let worker_fault = Arc::clone(&fault);
        let worker_store = Arc::clone(&store);
        let worker = std::thread::Builder::new()
            .name("sequent-feed".into())
            .spawn(move || {
                let outcome = consumer.run(subscription.receiver, shutdown_rx);
                if let Some(ref err) = outcome {
                    *worker_fault.lock() = Some(err.to_string());
                    worker_store.unsubscribe(subscription_id);
                }
                outcome
            })?;

        Ok(Self {
            store,
            log: Arc::clone(&log),
            replay: ReplayService::new(log),
            subscription: subscription_id,
            shutdown: shutdown_tx,
            worker: Some(worker),
            fault,
        })
    }

    /// Index of the most recently recorded entry.
    pub fn latest_sequence_index(&self) -> Result<SeqIndex> {
        self.log.latest_index()
    }

    /// Every entry recorded after `index`, in increasing index order.
    pub fn changes_since(&self, index: SeqIndex) -> Result<Vec<SequenceEntry>> {
        self.replay.changes_since(index)
    }

    /// The fatal error that halted feed consumption, if any.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Stop pulling events from the feed and wait for the in-flight event to
    /// finish. An append that was started completes; one that was not stays
    /// unstarted.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let _ = self.shutdown.try_send(());
        self.store.unsubscribe(self.subscription);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::DocumentBody;
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};

    fn body(value: Value) -> DocumentBody {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    fn wait_for_index(engine: &Engine, index: SeqIndex) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.latest_sequence_index().unwrap() < index {
            assert!(Instant::now() < deadline, "timed out waiting for {:?}", index);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_initialize_and_consume_one_change() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::initialize(
            store.clone(),
            EngineConfig {
                watchlist: vec![DocId::new("profile")],
                ..Default::default()
            },
        )
        .unwrap();

        store
            .put(&DocId::new("profile"), body(json!({"name": "ada"})))
            .unwrap();
        wait_for_index(&engine, SeqIndex(1));

        let entries = engine.changes_since(SeqIndex::ZERO).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].doc_id, DocId::new("profile"));
        assert!(engine.fault().is_none());
        engine.shutdown();
    }

    #[test]
    fn test_initialize_fails_when_store_is_down() {
        let store = Arc::new(MemoryStore::new());
        store.fail_gets(1);
        let result = Engine::initialize(store, EngineConfig::default());
        assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
    }

    #[test]
    fn test_shutdown_stops_consumption() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::initialize(
            store.clone(),
            EngineConfig {
                watchlist: vec![DocId::new("doc")],
                ..Default::default()
            },
        )
        .unwrap();
        engine.shutdown();

        // Changes after shutdown are not consumed by this instance.
        store.put(&DocId::new("doc"), body(json!({"a": 1}))).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let log = SequenceLog::new(store as Arc<dyn DocumentStore>, DocId::new("sequences"));
        let (_, latest) = log.bootstrap().unwrap();
        assert_eq!(latest, SeqIndex::ZERO);
    }
}

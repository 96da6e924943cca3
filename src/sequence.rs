//! Durable sequence log, persisted as a single versioning document in the
//! external store.
//!
//! All mutation goes through a read-modify-write of that one document. Index
//! assignment is logically serialized: a conflicting concurrent write is
//! detected by the store's optimistic concurrency check and the merge is
//! retried from a fresh read, so `latest_index` never skips or repeats even
//! if another writer touched the document between read and write.

use crate::error::{EngineError, Result};
use crate::store::DocumentStore;
use crate::types::{
    ChangeRecord, Cursor, DocId, DocumentBody, SeqIndex, SequenceEntry, VersioningDocument,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bounded retries for conflicting writes to the versioning document.
pub const DEFAULT_APPEND_RETRIES: u32 = 5;

/// Owns read-modify-write access to the versioning document.
pub struct SequenceLog {
    store: Arc<dyn DocumentStore>,
    doc_id: DocId,
    /// Cached head index; `None` until `bootstrap` has run.
    latest: RwLock<Option<SeqIndex>>,
    retry_limit: u32,
}

impl SequenceLog {
    pub fn new(store: Arc<dyn DocumentStore>, doc_id: DocId) -> Self {
        Self::with_retry_limit(store, doc_id, DEFAULT_APPEND_RETRIES)
    }

    pub fn with_retry_limit(store: Arc<dyn DocumentStore>, doc_id: DocId, retry_limit: u32) -> Self {
        Self {
            store,
            doc_id,
            latest: RwLock::new(None),
            retry_limit,
        }
    }

    /// Read the versioning document, creating it on first boot.
    ///
    /// Returns the persisted cursor and latest index so the caller can resume
    /// the feed and continue index assignment where the last run stopped.
    /// A store failure here is fatal to startup.
    pub fn bootstrap(&self) -> Result<(Cursor, SeqIndex)> {
        let doc = match self.read()? {
            Some((doc, _)) => doc,
            None => {
                let doc = VersioningDocument::initial(self.store.initial_cursor());
                self.store.put(&self.doc_id, doc.to_body()?)?;
                debug!(doc = %self.doc_id, "created versioning document");
                doc
            }
        };

        *self.latest.write() = Some(doc.latest_index);
        Ok((doc.cursor, doc.latest_index))
    }

    /// Record a change batch under the next index, advancing the head and
    /// the external cursor in the same write.
    pub fn append(
        &self,
        doc_id: &DocId,
        changes: Vec<ChangeRecord>,
        cursor: Cursor,
    ) -> Result<SeqIndex> {
        if self.latest.read().is_none() {
            return Err(EngineError::NotInitialized);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let (mut doc, raw) = self.read()?.ok_or_else(|| self.missing())?;
            let index = doc.latest_index.next();
            doc.record(index, doc_id.clone(), changes.clone(), cursor);

            let mut body = doc.to_body()?;
            if let Some(rev) = raw.get("_rev") {
                body.insert("_rev".into(), rev.clone());
            }

            match self.store.put(&self.doc_id, body) {
                Ok(_) => {
                    *self.latest.write() = Some(index);
                    debug!(
                        index = index.0,
                        doc = %doc_id,
                        records = changes.len(),
                        "appended sequence entry"
                    );
                    return Ok(index);
                }
                Err(EngineError::Conflict(_)) if attempt <= self.retry_limit => {
                    warn!(
                        attempt,
                        doc = %self.doc_id,
                        "conflicting write to versioning document, retrying from fresh read"
                    );
                }
                Err(EngineError::Conflict(_)) => {
                    return Err(EngineError::StoreUnavailable(format!(
                        "versioning document conflict persisted after {} attempts",
                        attempt
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every entry with index strictly greater than `index`, in increasing
    /// index order. An index at or beyond the head yields an empty list.
    ///
    /// Reads one fresh copy of the versioning document, so the result is
    /// consistent as of a single committed append.
    pub fn get_since(&self, index: SeqIndex) -> Result<Vec<SequenceEntry>> {
        if self.latest.read().is_none() {
            return Err(EngineError::NotInitialized);
        }

        let (doc, _) = self.read()?.ok_or_else(|| self.missing())?;
        Ok(doc.entries_since(index))
    }

    /// Head index as of the last bootstrap or append.
    pub fn latest_index(&self) -> Result<SeqIndex> {
        (*self.latest.read()).ok_or(EngineError::NotInitialized)
    }

    fn read(&self) -> Result<Option<(VersioningDocument, DocumentBody)>> {
        match self.store.get(&self.doc_id, None)? {
            Some(body) => {
                let doc = VersioningDocument::from_body(&body)
                    .map_err(|e| EngineError::Deserialization(e.to_string()))?;
                Ok(Some((doc, body)))
            }
            None => Ok(None),
        }
    }

    fn missing(&self) -> EngineError {
        EngineError::StoreUnavailable(format!("versioning document {} missing", self.doc_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::ChangeAction;
    use serde_json::json;

    fn log_over(store: &Arc<MemoryStore>) -> SequenceLog {
        SequenceLog::new(store.clone() as Arc<dyn DocumentStore>, DocId::new("sequences"))
    }

    #[test]
    fn test_bootstrap_creates_document_lazily() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);

        let (cursor, latest) = log.bootstrap().unwrap();
        assert_eq!(cursor, Cursor::ZERO);
        assert_eq!(latest, SeqIndex::ZERO);

        let body = store.get(&DocId::new("sequences"), None).unwrap().unwrap();
        assert_eq!(body["latest_index"], json!(0));
        assert_eq!(body["cursor"], json!(0));
    }

    #[test]
    fn test_bootstrap_returns_persisted_head() {
        let store = Arc::new(MemoryStore::new());
        {
            let log = log_over(&store);
            log.bootstrap().unwrap();
            log.append(&DocId::new("a"), vec![ChangeRecord::delete("x")], Cursor(7))
                .unwrap();
        }

        let log = log_over(&store);
        let (cursor, latest) = log.bootstrap().unwrap();
        assert_eq!(cursor, Cursor(7));
        assert_eq!(latest, SeqIndex(1));
    }

    #[test]
    fn test_append_before_bootstrap_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);
        let result = log.append(&DocId::new("a"), vec![], Cursor(1));
        assert!(matches!(result, Err(EngineError::NotInitialized)));
        assert!(matches!(log.latest_index(), Err(EngineError::NotInitialized)));
        assert!(matches!(
            log.get_since(SeqIndex::ZERO),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn test_append_assigns_contiguous_indices() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);
        log.bootstrap().unwrap();

        for i in 1..=5u64 {
            let index = log
                .append(&DocId::new("doc"), vec![], Cursor(i))
                .unwrap();
            assert_eq!(index, SeqIndex(i));
        }
        assert_eq!(log.latest_index().unwrap(), SeqIndex(5));
    }

    #[test]
    fn test_index_and_cursor_land_in_same_write() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);
        log.bootstrap().unwrap();

        log.append(
            &DocId::new("doc"),
            vec![ChangeRecord::insert("a", json!(1))],
            Cursor(42),
        )
        .unwrap();

        let body = store.get(&DocId::new("sequences"), None).unwrap().unwrap();
        assert_eq!(body["latest_index"], json!(1));
        assert_eq!(body["cursor"], json!(42));
    }

    #[test]
    fn test_get_since_scans_in_order() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);
        log.bootstrap().unwrap();

        log.append(&DocId::new("a"), vec![ChangeRecord::insert("x", json!(1))], Cursor(1))
            .unwrap();
        log.append(&DocId::new("b"), vec![ChangeRecord::delete("y")], Cursor(2))
            .unwrap();

        let all = log.get_since(SeqIndex::ZERO).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].index, SeqIndex(1));
        assert_eq!(all[0].changes[0].action, ChangeAction::Insert);
        assert_eq!(all[1].index, SeqIndex(2));

        let tail = log.get_since(SeqIndex(1)).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].doc_id, DocId::new("b"));

        assert!(log.get_since(SeqIndex(2)).unwrap().is_empty());
        assert!(log.get_since(SeqIndex(100)).unwrap().is_empty());
    }

    #[test]
    fn test_append_retries_through_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);
        log.bootstrap().unwrap();

        store.inject_conflicts(2);
        let index = log.append(&DocId::new("doc"), vec![], Cursor(1)).unwrap();
        assert_eq!(index, SeqIndex(1));
    }

    #[test]
    fn test_append_escalates_after_retry_exhaustion() {
        let store = Arc::new(MemoryStore::new());
        let log = SequenceLog::with_retry_limit(
            store.clone() as Arc<dyn DocumentStore>,
            DocId::new("sequences"),
            2,
        );
        log.bootstrap().unwrap();

        store.inject_conflicts(10);
        let result = log.append(&DocId::new("doc"), vec![], Cursor(1));
        assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
        // Head is unchanged; nothing was recorded.
        assert_eq!(log.latest_index().unwrap(), SeqIndex::ZERO);
    }

    #[test]
    fn test_bootstrap_fails_fatally_when_store_is_down() {
        let store = Arc::new(MemoryStore::new());
        let log = log_over(&store);

        store.fail_gets(1);
        assert!(matches!(
            log.bootstrap(),
            Err(EngineError::StoreUnavailable(_))
        ));
    }
}

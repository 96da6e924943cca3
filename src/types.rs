//! Core types for the change sequencer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Identifier of a document in the external store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        DocId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({})", self.0)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(s.to_string())
    }
}

/// Store revision token. Opaque to the engine; compared only for equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in the external store's change feed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Before any committed change.
    pub const ZERO: Cursor = Cursor(0);
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

/// Position in the sequence log. Contiguous, 1-based; 0 is reserved as
/// "before any change".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SeqIndex(pub u64);

impl SeqIndex {
    /// Before any recorded change.
    pub const ZERO: SeqIndex = SeqIndex(0);

    pub fn next(self) -> Self {
        SeqIndex(self.0 + 1)
    }
}

impl fmt::Debug for SeqIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for SeqIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field map of a document, exactly as the store hands it out. Reserved
/// fields live alongside data fields.
pub type DocumentBody = serde_json::Map<String, Value>;

/// Store-reserved identity and revision fields. Never diffed, never emitted.
pub const RESERVED_FIELDS: [&str; 2] = ["_id", "_rev"];

/// Returns true for fields the store owns rather than the application.
pub fn is_reserved_field(key: &str) -> bool {
    RESERVED_FIELDS.contains(&key)
}

/// What happened to a single field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// One changed field: the action, the field key, and the new value
/// (absent for deletions).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub action: ChangeAction,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ChangeRecord {
    pub fn insert(key: impl Into<String>, data: Value) -> Self {
        Self {
            action: ChangeAction::Insert,
            key: key.into(),
            data: Some(data),
        }
    }

    pub fn update(key: impl Into<String>, data: Value) -> Self {
        Self {
            action: ChangeAction::Update,
            key: key.into(),
            data: Some(data),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Delete,
            key: key.into(),
            data: None,
        }
    }
}

/// One recorded change batch, as returned by replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub index: SeqIndex,
    pub doc_id: DocId,
    pub changes: Vec<ChangeRecord>,
}

/// Per-index change batches, keyed by the document each batch came from.
pub type DiffMap = BTreeMap<SeqIndex, BTreeMap<DocId, Vec<ChangeRecord>>>;

/// The single durable root of the engine, persisted as a document in the
/// external store. `latest_index` and `cursor` always advance together in
/// one write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersioningDocument {
    pub latest_index: SeqIndex,
    pub cursor: Cursor,
    pub diffs: DiffMap,
}

impl VersioningDocument {
    /// Fresh document for first boot: index 0, the store's initial cursor,
    /// no recorded diffs.
    pub fn initial(cursor: Cursor) -> Self {
        Self {
            latest_index: SeqIndex::ZERO,
            cursor,
            diffs: BTreeMap::new(),
        }
    }

    /// Parse from a stored body. Reserved fields are ignored.
    pub fn from_body(body: &DocumentBody) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(body.clone()))
    }

    /// Serialize to a body suitable for writing back to the store.
    /// The caller re-attaches `_rev` for optimistic concurrency.
    pub fn to_body(&self) -> Result<DocumentBody, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => unreachable!("versioning document serializes to an object"),
        }
    }

    /// Record a change batch under `index` and advance the head.
    pub fn record(
        &mut self,
        index: SeqIndex,
        doc_id: DocId,
        changes: Vec<ChangeRecord>,
        cursor: Cursor,
    ) {
        self.diffs.entry(index).or_default().insert(doc_id, changes);
        self.latest_index = index;
        self.cursor = cursor;
    }

    /// Every entry with index strictly greater than `index`, in increasing
    /// index order.
    pub fn entries_since(&self, index: SeqIndex) -> Vec<SequenceEntry> {
        self.diffs
            .range((Bound::Excluded(index), Bound::Unbounded))
            .flat_map(|(idx, per_doc)| {
                per_doc.iter().map(move |(doc_id, changes)| SequenceEntry {
                    index: *idx,
                    doc_id: doc_id.clone(),
                    changes: changes.clone(),
                })
            })
            .collect()
    }
}

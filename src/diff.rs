//! Field-level diffing between document bodies.

use crate::types::{is_reserved_field, ChangeRecord, DocumentBody};

/// Compare two bodies and emit one record per changed field.
///
/// Inserts and updates come first, deletes after; each pass is ordered by
/// field key. Reserved identity/revision fields are excluded on both sides.
/// An absent body stands for a document that does not (or no longer does)
/// exist: `old = None` inserts every field, `new = None` deletes every field.
///
/// Value comparison is structural, so nested objects and arrays compare by
/// content rather than identity.
pub fn diff(old: Option<&DocumentBody>, new: Option<&DocumentBody>) -> Vec<ChangeRecord> {
    let empty = DocumentBody::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);

    let mut records = Vec::new();

    let mut added: Vec<&String> = new
        .keys()
        .filter(|k| !is_reserved_field(k.as_str()))
        .collect();
    added.sort();
    for key in added {
        let value = &new[key.as_str()];
        match old.get(key) {
            None => records.push(ChangeRecord::insert(key.clone(), value.clone())),
            Some(previous) if previous != value => {
                records.push(ChangeRecord::update(key.clone(), value.clone()))
            }
            Some(_) => {}
        }
    }

    let mut dropped: Vec<&String> = old
        .keys()
        .filter(|k| !is_reserved_field(k.as_str()) && !new.contains_key(k.as_str()))
        .collect();
    dropped.sort();
    for key in dropped {
        records.push(ChangeRecord::delete(key.clone()));
    }

    records
}

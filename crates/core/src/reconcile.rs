use serde::{Deserialize, Serialize};

use crate::tags::{TagKeys, TagSet};

/// Outcome of planning a tag write against a freshly read tag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagChange {
    Noop,
    Write(TagSet),
}

/// Compute the tag set to persist.
///
/// Requested adds are authoritative and win over a removal of the same key.
/// Existing tags named by neither request are carried over unchanged.
pub fn reconcile(existing: &TagSet, to_add: &TagSet, to_remove: &TagKeys) -> TagSet {
    let mut result = to_add.clone();
    for (key, value) in existing.iter() {
        if result.contains_key(key) || to_remove.contains(key) { continue; }
        result.insert(key, value);
    }
    result
}

/// Reconcile and decide whether a write is needed at all.
pub fn plan(existing: &TagSet, to_add: &TagSet, to_remove: &TagKeys) -> TagChange {
    let result = reconcile(existing, to_add, to_remove);
    if &result == existing { TagChange::Noop } else { TagChange::Write(result) }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::IngestError;

/// Keys named by a remove-tag request.
pub type TagKeys = BTreeSet<String>;

/// A resource's tags, keyed and kept in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

/// How repeated keys in a pair list are treated on ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ingest {
    /// Any repeated key is rejected.
    #[default]
    Strict,
    /// The last occurrence of a key wins.
    LastWins,
}

impl TagSet {
    pub fn new() -> Self { Self::default() }

    /// Normalize a provider pair list. A pair without a key, or with an
    /// empty key, is rejected rather than dropped.
    pub fn from_pairs<I>(pairs: I, ingest: Ingest) -> Result<Self, IngestError>
    where
        I: IntoIterator<Item = (Option<String>, String)>,
    {
        let mut out = BTreeMap::new();
        for (ix, (key, value)) in pairs.into_iter().enumerate() {
            let key = key.ok_or(IngestError::MissingKey(ix))?;
            if key.is_empty() { return Err(IngestError::EmptyKey(ix)); }
            if out.contains_key(&key) && ingest == Ingest::Strict {
                return Err(IngestError::DuplicateKey(key));
            }
            out.insert(key, value);
        }
        Ok(Self(out))
    }

    pub fn get(&self, key: &str) -> Option<&str> { self.0.get(key).map(String::as_str) }
    pub fn contains_key(&self, key: &str) -> bool { self.0.contains_key(key) }
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }
    pub fn remove(&mut self, key: &str) -> Option<String> { self.0.remove(key) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(m: BTreeMap<String, String>) -> Self { Self(m) }
}

impl IntoIterator for TagSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;
    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

use serde::Serialize;
use std::collections::BTreeMap;

use crate::fallback::is_blank;

/// Extracted values for one request, keyed by template key.
///
/// The geometric pass writes first; later sources may only fill keys that are
/// still blank, so a credible reading is never replaced.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, String>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, "" when unresolved.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    /// Store `value` under `key` unless the key already holds a non-blank
    /// value.  The key is recorded even when `value` is empty.
    /// Returns `true` when a non-empty value was written.
    pub fn fill(&mut self, key: &str, value: &str) -> bool {
        let slot = self.0.entry(key.to_string()).or_default();
        if !is_blank(slot) || value.trim().is_empty() {
            return false;
        }
        *slot = value.trim().to_string();
        true
    }

    pub fn is_blank(&self, key: &str) -> bool {
        is_blank(self.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            let (k, v): (String, String) = (k.into(), v.into());
            map.fill(&k, &v);
        }
        map
    }
}

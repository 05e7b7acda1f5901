// ABOUTME: Defines Index, the in-memory key/value map materialized from a journal.
// ABOUTME: The apply() method folds a single Item into the map; replay and live mutations share it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::item::{Action, Item};

/// The materialized state of a collection. Kept ordered so key listings and
/// snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    entries: BTreeMap<String, String>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one journal record into the map. Push and Set are both upserts;
    /// popping an absent key is a no-op so replay stays idempotent.
    pub fn apply(&mut self, item: &Item) {
        match item.action {
            Action::Push | Action::Set => {
                self.entries.insert(item.key.clone(), item.value.clone());
            }
            Action::Pop => {
                self.entries.remove(&item.key);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }
}

impl From<BTreeMap<String, String>> for Index {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, String)> for Index {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(seq: u64, action: Action, key: &str, value: &str) -> Item {
        Item::new(seq, action, key, value, Utc::now())
    }

    #[test]
    fn push_and_set_upsert() {
        let mut index = Index::new();
        index.apply(&item(1, Action::Push, "a", "1"));
        index.apply(&item(2, Action::Push, "a", "2"));
        index.apply(&item(3, Action::Set, "b", "3"));

        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a"), Some("2"));
        assert_eq!(index.get("b"), Some("3"));
    }

    #[test]
    fn pop_removes_and_is_idempotent() {
        let mut index = Index::new();
        index.apply(&item(1, Action::Push, "a", "1"));
        index.apply(&item(2, Action::Pop, "a", "1"));
        index.apply(&item(3, Action::Pop, "a", ""));
        index.apply(&item(4, Action::Pop, "never", ""));

        assert!(index.is_empty());
        assert!(!index.contains_key("a"));
    }

    #[test]
    fn refolding_history_over_its_own_result_is_stable() {
        let history = vec![
            item(1, Action::Push, "a", "1"),
            item(2, Action::Push, "b", "2"),
            item(3, Action::Pop, "a", "1"),
            item(4, Action::Set, "b", "3"),
            item(5, Action::Push, "a", "4"),
        ];

        let mut folded = Index::new();
        for i in &history {
            folded.apply(i);
        }

        let mut refolded = folded.clone();
        for i in &history {
            refolded.apply(i);
        }

        assert_eq!(folded, refolded);
    }

    #[test]
    fn keys_are_ordered() {
        let index: Index = [("b", "2"), ("a", "1"), ("c", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let keys: Vec<&String> = index.keys().collect();
        assert_eq!(keys, ["a", "b", "c"]);

        let pairs: Vec<(&str, &str)> = index
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(pairs, [("a", "1"), ("b", "2"), ("c", "3")]);
    }

    #[test]
    fn serializes_as_plain_object() {
        let mut index = Index::new();
        index.apply(&item(1, Action::Push, "/fred", "{}"));

        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json, serde_json::json!({"/fred": "{}"}));
    }
}

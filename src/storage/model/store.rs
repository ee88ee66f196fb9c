//! Append-only, epoch-indexed sample store.

use std::collections::BTreeMap;
use std::collections::btree_map;

use super::epoch::EpochRecord;

/// Every epoch record of a run, keyed by integer epoch index.
///
/// Iteration is always in ascending index order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleStore {
    epochs: BTreeMap<u64, EpochRecord>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the record for `index`, replacing any previous one.
    pub fn insert(&mut self, index: u64, record: EpochRecord) {
        self.epochs.insert(index, record);
    }

    pub fn get(&self, index: u64) -> Option<&EpochRecord> {
        self.epochs.get(&index)
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &EpochRecord)> {
        self.epochs.iter().map(|(k, v)| (*k, v))
    }
}

impl IntoIterator for SampleStore {
    type Item = (u64, EpochRecord);
    type IntoIter = btree_map::IntoIter<u64, EpochRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.epochs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_order() {
        let mut store = SampleStore::new();
        for index in [10, 2, 1, 33] {
            store.insert(index, EpochRecord::new(index as f64));
        }

        let order: Vec<u64> = store.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec![1, 2, 10, 33]);
        assert_eq!(store.get(10).map(|r| r.timestamp), Some(10.0));
        assert_eq!(store.len(), 4);

        let owned: Vec<u64> = store.into_iter().map(|(k, _)| k).collect();
        assert_eq!(owned, vec![1, 2, 10, 33]);
    }

    #[test]
    fn test_empty_store() {
        let store = SampleStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.get(0).is_none());
    }
}

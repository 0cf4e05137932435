//! Bidirectional maps between axis labels and matrix offsets.

use hashbrown::HashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// A sorted, deduplicated list of labels with their zero-based offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct Axis<K: Eq + Hash> {
    labels: Vec<K>,
    offsets: HashMap<K, usize>,
}

impl<K: Clone + Eq + Hash + Ord> Axis<K> {
    /// Build an axis from labels in any order. Duplicates are dropped.
    pub fn new(labels: impl IntoIterator<Item = K>) -> Self {
        let mut labels: Vec<K> = labels.into_iter().collect();
        labels.sort_unstable();
        labels.dedup();
        let offsets = labels
            .iter()
            .enumerate()
            .map(|(offset, label)| (label.clone(), offset))
            .collect();
        Self { labels, offsets }
    }

    /// Build an axis from labels already paired with their offsets.
    ///
    /// Returns `None` unless the offsets are exactly `0..n` and the labels sort in offset order.
    pub fn from_offsets(pairs: impl IntoIterator<Item = (K, usize)>) -> Option<Self> {
        let mut pairs: Vec<(K, usize)> = pairs.into_iter().collect();
        pairs.sort_unstable_by_key(|(_, offset)| *offset);
        let contiguous = pairs
            .iter()
            .enumerate()
            .all(|(expected, (_, offset))| expected == *offset);
        let sorted = pairs.windows(2).all(|pair| pair[0].0 < pair[1].0);
        if !contiguous || !sorted {
            return None;
        }
        Some(Self::new(pairs.into_iter().map(|(label, _)| label)))
    }

    pub fn offset<Q>(&self, label: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.offsets.get(label).copied()
    }

    pub fn label(&self, offset: usize) -> Option<&K> {
        self.labels.get(offset)
    }

    pub fn labels(&self) -> &[K] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn last(&self) -> Option<&K> {
        self.labels.last()
    }
}

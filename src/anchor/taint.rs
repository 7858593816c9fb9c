//! Ordered, duplicate-free taint labels

use serde::{Deserialize, Deserializer, Serialize};

/// Ordered set of taint labels
///
/// Insertion order is preserved so the persisted config stays stable across
/// rewrites. Adding a present label and removing an absent one are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaintSet {
    taints: Vec<String>,
}

impl TaintSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a taint; returns false if it was already present
    pub fn add(&mut self, taint: &str) -> bool {
        if self.contains(taint) {
            return false;
        }
        self.taints.push(taint.to_string());
        true
    }

    /// Remove a taint; returns false if it was not present
    pub fn remove(&mut self, taint: &str) -> bool {
        let before = self.taints.len();
        self.taints.retain(|t| t != taint);
        self.taints.len() != before
    }

    /// Whether the taint is present
    pub fn contains(&self, taint: &str) -> bool {
        self.taints.iter().any(|t| t == taint)
    }

    /// Number of taints
    pub fn len(&self) -> usize {
        self.taints.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.taints.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.taints.iter().map(String::as_str)
    }

    /// Borrow as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.taints
    }
}

impl<S: AsRef<str>> FromIterator<S> for TaintSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TaintSet::new();
        for taint in iter {
            set.add(taint.as_ref());
        }
        set
    }
}

// Hand-edited configs may carry duplicates; collapse them on load.
impl<'de> Deserialize<'de> for TaintSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let taints = Option::<Vec<String>>::deserialize(deserializer)?;
        Ok(taints.unwrap_or_default().into_iter().collect())
    }
}

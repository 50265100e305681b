//! Target model shared by every discovery backend
//!
//! A [`TargetGroup`] is what a backend hands to its consumer after one poll
//! cycle. Each target inside it is a [`LabelSet`] that carries at least the
//! [`ADDRESS_LABEL`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `host:port` of the scrape target. Mandatory on every emitted target.
pub const ADDRESS_LABEL: &str = "address";

/// HTTP path to scrape when it differs from the scraper's default.
pub const METRICS_PATH_LABEL: &str = "metrics_path";

/// Key-value metadata attached to a single scrape target
///
/// Keys are unique and iterate in sorted order, so two label sets built from
/// the same inventory record compare and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Create an empty label set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a label set with its address already set
    pub fn with_address(address: impl Into<String>) -> Self {
        let mut labels = Self::new();
        labels.insert(ADDRESS_LABEL, address);
        labels
    }

    /// Insert a label, returning the previous value if the key was present
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Get a label value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The target's `host:port`, if set
    pub fn address(&self) -> Option<&str> {
        self.get(ADDRESS_LABEL)
    }

    /// Whether this label set may be emitted (it has a non-empty address)
    pub fn has_address(&self) -> bool {
        self.address().is_some_and(|address| !address.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate labels in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        f.write_str("}")
    }
}

/// A named batch of scrape targets produced by one source in one poll cycle
///
/// The consumer replaces whatever it previously received under `source`
/// with the targets of the newest group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    /// Identifies the discovery source, e.g. `ec2:us-east-1`
    pub source: String,

    /// Targets in upstream iteration order
    #[serde(default)]
    pub targets: Vec<LabelSet>,
}

impl TargetGroup {
    /// Create a target group
    pub fn new(source: impl Into<String>, targets: Vec<LabelSet>) -> Self {
        Self {
            source: source.into(),
            targets,
        }
    }

    /// Create a group with no targets
    pub fn empty(source: impl Into<String>) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

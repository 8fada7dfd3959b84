//! Equality-based label selectors
//!
//! A [`LabelSelector`] is the query handed to the cluster client when an
//! apployment's resources are cleaned up. It only supports `key=value`
//! terms, which is all the compiler emits.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Conjunction of `key=value` label requirements
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector requiring every entry of `labels`
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels: labels,
        }
    }

    /// Add a requirement
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Required labels
    pub fn match_labels(&self) -> &BTreeMap<String, String> {
        &self.match_labels
    }

    /// True if `labels` carries every required key with the required value
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Query string for list calls (`k1=v1,k2=v2`)
    pub fn to_query(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// True when the selector has no requirement and would match everything
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

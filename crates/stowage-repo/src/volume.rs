//! Volume: a named, ordered series of snapshots.

use serde::{Deserialize, Serialize};

use crate::snapshot::short_id;

/// Ordered snapshot ids under one name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Short random id
    pub id: String,
    /// Human name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Snapshot ids, oldest first
    pub snapshots: Vec<String>,
}

impl Volume {
    /// Empty volume with a fresh id.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            name: name.into(),
            description: description.into(),
            snapshots: Vec::new(),
        }
    }

    /// Append a snapshot id unless it is already listed.
    pub fn add_snapshot(&mut self, id: &str) {
        if !self.contains(id) {
            self.snapshots.push(id.to_string());
        }
    }

    /// Drop a snapshot id. Returns whether it was listed.
    pub fn remove_snapshot(&mut self, id: &str) -> bool {
        let before = self.snapshots.len();
        self.snapshots.retain(|s| s != id);
        self.snapshots.len() != before
    }

    /// Whether `id` belongs to this volume.
    pub fn contains(&self, id: &str) -> bool {
        self.snapshots.iter().any(|s| s == id)
    }

    /// Most recent snapshot id.
    pub fn latest(&self) -> Option<&str> {
        self.snapshots.last().map(String::as_str)
    }
}

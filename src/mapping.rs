use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

fn default_enabled() -> bool {
    true
}

/// One linked project pair and its vocabulary tables. Loaded once per cycle
/// from configuration and read-only for the duration of the cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMapping {
    /// Portfolio scope id (e.g. "Scope:1024").
    pub local_project: String,
    /// Tracker project key (e.g. "FER").
    pub tracker_project: String,
    /// Optional epic category filter; only epics of this category sync.
    #[serde(default)]
    pub epic_category: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tracker status name -> portfolio status name.
    #[serde(default)]
    pub status_map: HashMap<String, String>,
    /// Tracker priority name -> portfolio priority name.
    #[serde(default)]
    pub priority_map: HashMap<String, String>,
    /// Tracker statuses that count as closed.
    #[serde(default)]
    pub done_words: Vec<String>,
    /// Tracker priority used when pushing a local priority with no mapping.
    #[serde(default)]
    pub default_tracker_priority: Option<String>,
}

impl ProjectMapping {
    pub fn label(&self) -> String {
        format!("{} <-> {}", self.local_project, self.tracker_project)
    }

    /// Whether a tracker status name means "closed" for this pair.
    pub fn is_done(&self, status: &str) -> bool {
        self.done_words.iter().any(|w| w.eq_ignore_ascii_case(status))
    }

    /// Translate a tracker status to the portfolio vocabulary. A miss means
    /// "do not set the field", never "set it to empty".
    pub fn local_status(&self, tracker_status: &str) -> Option<String> {
        if tracker_status.is_empty() {
            return None;
        }
        match self.status_map.get(tracker_status) {
            Some(s) => Some(s.clone()),
            None => {
                warn!(
                    pair = %self.label(),
                    status = tracker_status,
                    "no status mapping, leaving field unset"
                );
                None
            }
        }
    }

    /// Translate a tracker priority to the portfolio vocabulary.
    pub fn local_priority(&self, tracker_priority: &str) -> Option<String> {
        if tracker_priority.is_empty() {
            return None;
        }
        match self.priority_map.get(tracker_priority) {
            Some(p) => Some(p.clone()),
            None => {
                warn!(
                    pair = %self.label(),
                    priority = tracker_priority,
                    "no priority mapping, leaving field unset"
                );
                None
            }
        }
    }

    /// Translate a portfolio priority to the tracker vocabulary (reverse
    /// lookup). An empty local priority omits the field; a miss falls back
    /// to the configured default.
    pub fn tracker_priority(&self, local_priority: &str) -> Option<String> {
        if local_priority.is_empty() {
            return None;
        }
        let hit = self
            .priority_map
            .iter()
            .find(|(_, local)| local.as_str() == local_priority)
            .map(|(tracker, _)| tracker.clone());
        if hit.is_none() {
            warn!(
                pair = %self.label(),
                priority = local_priority,
                "no tracker priority mapping, using default"
            );
            return self.default_tracker_priority.clone();
        }
        hit
    }
}

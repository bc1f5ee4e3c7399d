use std::fmt;

/// The work item families the engine reconciles. Stories and defects flow
/// tracker-to-portfolio; epics flow the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Epic,
    Story,
    Defect,
}

impl ItemKind {
    /// Asset type name used by the portfolio API.
    pub fn asset_name(&self) -> &'static str {
        match self {
            ItemKind::Epic => "Epic",
            ItemKind::Story => "Story",
            ItemKind::Defect => "Defect",
        }
    }

    /// Issue type name used by the tracker API.
    pub fn issue_type(&self) -> &'static str {
        match self {
            ItemKind::Epic => "Epic",
            ItemKind::Story => "Story",
            ItemKind::Defect => "Bug",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.asset_name())
    }
}

/// Portfolio asset lifecycle state. Deletion is reversible on the portfolio
/// side, so deleted records can still be fetched and operated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetState {
    #[default]
    Active,
    Closed,
    Deleted,
}

/// A portfolio work item (epic, story, or defect).
///
/// `reference` carries the tracker issue key once the two records are
/// linked. It is written exactly once, at link time, and cleared only while
/// the record is being purged.
#[derive(Debug, Clone, Default)]
pub struct WorkItem {
    pub local_id: String,
    /// Human-readable portfolio key, immutable once assigned (e.g. "S-01023").
    pub number: String,
    pub name: String,
    pub description: String,
    pub scope_id: String,
    pub scope_name: String,
    pub reference: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub asset_state: AssetState,
    /// Tracker key of the parent epic, as recorded on the portfolio side.
    /// Only stories and defects carry one.
    pub parent_reference: Option<String>,
    pub owner_ids: Vec<String>,
}

impl WorkItem {
    /// The tracker key this item is linked to, or "" when unlinked.
    pub fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or("")
    }

    pub fn is_linked(&self) -> bool {
        !self.reference().is_empty()
    }
}

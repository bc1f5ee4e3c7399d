/// A tracker issue as seen by the reconciler. The connector flattens the
/// wire shape (rendered description, custom fields) before handing issues
/// to the sync workers.
#[derive(Debug, Clone, Default)]
pub struct TrackerIssue {
    /// Immutable tracker key, globally unique (e.g. "FER-42").
    pub key: String,
    pub summary: String,
    pub description: String,
    pub priority: Option<String>,
    pub status: String,
    /// Carries the portfolio item number once linked.
    pub labels: Vec<String>,
    /// Key of the epic this issue belongs to.
    pub parent_link: Option<String>,
    pub story_points: Option<f64>,
    pub remaining_seconds: Option<i64>,
    /// Tracker account id of the assignee.
    pub assignee: Option<String>,
}

/// A workflow transition available on a tracker issue.
#[derive(Debug, Clone)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Status the issue lands in after the transition runs.
    pub to_status: String,
}

/// Custom field ids discovered from tracker metadata, resolved once per
/// project pair at the start of a cycle. Workers read this table instead of
/// probing field names at runtime.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    pub epic_name: Option<String>,
    pub epic_link: Option<String>,
    pub story_points: Option<String>,
}

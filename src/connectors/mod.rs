pub mod portfolio;
pub mod query;
pub mod tracker;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::model::issue::{FieldCatalog, TrackerIssue, Transition};
use crate::model::time_entry::{TimeEntry, Worklog};
use crate::model::work_item::{ItemKind, WorkItem};
use query::QueryClause;

/// Failures surfaced by the HTTP connectors. Workers catch these per item;
/// the variants exist so log messages can name what actually went wrong.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("unexpected status {status} from {url}")]
    Http { status: u16, url: String },
    #[error("malformed response from {url}: {detail}")]
    Malformed { url: String, detail: String },
}

/// Partial update payload for a portfolio item. Identity fields (id,
/// number, reference) never travel through this; `None` leaves a field
/// untouched on the portfolio side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    /// Local id of the parent epic.
    pub parent: Option<String>,
    /// Story points, rendered as a decimal string.
    pub estimate: Option<String>,
    /// Remaining effort in decimal hours.
    pub to_do: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == ItemPatch::default()
    }
}

/// Owner changes expressed as an add/remove list, never full replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl OwnerDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Create payload for a tracker issue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewIssue {
    pub project: String,
    pub issue_type: String,
    pub summary: String,
    pub description: String,
    /// Value for the tracker's late-bound epic-name field.
    pub epic_name: Option<String>,
    pub priority: Option<String>,
    pub labels: Vec<String>,
}

/// Partial update payload for a tracker issue. The key never travels
/// through this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuePatch {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    /// Full replacement label set; merging is the caller's job.
    pub labels: Option<Vec<String>>,
}

/// The portfolio-side record store. Item ids are full oids ("Story:1042"),
/// so single-item calls need no separate kind argument.
#[async_trait]
pub trait PortfolioApi: Send + Sync {
    /// Fetch the active and closed items of one kind in one scope,
    /// optionally narrowed to one epic category.
    async fn fetch_items(
        &self,
        kind: ItemKind,
        scope_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<WorkItem>>;

    /// Fetch soft-deleted items of one kind in one scope.
    async fn fetch_deleted_items(&self, kind: ItemKind, scope_id: &str)
        -> Result<Vec<WorkItem>>;

    /// Create an item; the result carries the assigned id and number.
    async fn create_item(&self, kind: ItemKind, item: &WorkItem) -> Result<WorkItem>;

    async fn update_item(&self, local_id: &str, patch: &ItemPatch) -> Result<()>;

    async fn update_owners(&self, local_id: &str, delta: &OwnerDelta) -> Result<()>;

    /// Write the tracker key onto an item. Done exactly once per link.
    async fn set_reference(&self, local_id: &str, reference: &str) -> Result<()>;

    /// Clear the tracker key. Only legal while the item is being purged.
    async fn clear_reference(&self, local_id: &str) -> Result<()>;

    /// Run a named lifecycle operation (Inactivate, Reactivate, Delete,
    /// Undelete).
    async fn run_operation(&self, local_id: &str, op: &str) -> Result<()>;

    /// Attach a link record pointing at an external URL.
    async fn add_link(&self, local_id: &str, url: &str, title: &str) -> Result<()>;

    /// Browse URL for an item, used for tracker-side web links.
    fn item_url(&self, number: &str) -> String;

    /// Resolve a tracker account to a portfolio member id, if one matches.
    async fn resolve_member(&self, tracker_account: &str) -> Result<Option<String>>;

    async fn fetch_time_entries(&self, work_item_id: &str) -> Result<Vec<TimeEntry>>;

    /// Create a time entry; the result carries the assigned id.
    async fn create_time_entry(&self, entry: &TimeEntry) -> Result<TimeEntry>;

    /// Rewrite a time entry's date and/or value. The correlating reference
    /// is never rewritten.
    async fn update_time_entry(
        &self,
        local_id: &str,
        date: Option<&str>,
        hours: &str,
    ) -> Result<()>;
}

/// The tracker-side issue store.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Resolve the late-bound custom field ids once per cycle.
    async fn field_catalog(&self) -> Result<FieldCatalog>;

    /// Search issues; paging is handled inside the connector.
    async fn search(
        &self,
        clauses: &[QueryClause],
        catalog: &FieldCatalog,
    ) -> Result<Vec<TrackerIssue>>;

    /// Direct lookup by key. `Ok(None)` is a confirmed absence.
    async fn get_issue(&self, key: &str, catalog: &FieldCatalog)
        -> Result<Option<TrackerIssue>>;

    /// Create an issue and return its key. An empty or malformed response
    /// is an error, not a silent empty key.
    async fn create_issue(&self, issue: &NewIssue, catalog: &FieldCatalog) -> Result<String>;

    async fn update_issue(&self, key: &str, patch: &IssuePatch) -> Result<()>;

    async fn delete_issue(&self, key: &str) -> Result<()>;

    async fn add_comment(&self, key: &str, body: &str) -> Result<()>;

    /// Attach a web link pointing at an external URL.
    async fn add_web_link(&self, key: &str, url: &str, title: &str) -> Result<()>;

    async fn worklogs(&self, key: &str) -> Result<Vec<Worklog>>;

    async fn transitions(&self, key: &str) -> Result<Vec<Transition>>;

    async fn run_transition(&self, key: &str, transition_id: &str) -> Result<()>;

    /// Browse URL for an issue, used for portfolio-side link records.
    fn issue_url(&self, key: &str) -> String;
}

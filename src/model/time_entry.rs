use chrono::{DateTime, Utc};

/// A portfolio actual-time record.
///
/// `reference` holds the originating tracker worklog id as a string; an
/// entry with `hours == "0"` and no live worklog behind it is a tombstone
/// kept for audit history, never removed.
#[derive(Debug, Clone, Default)]
pub struct TimeEntry {
    pub local_id: String,
    /// Rendered date-time string, compared verbatim against worklog starts.
    pub date: String,
    /// Decimal hours as a string, e.g. "0.5".
    pub hours: String,
    pub reference: String,
    pub member_id: String,
    pub scope_id: String,
    pub work_item_id: String,
}

/// A tracker worklog entry.
#[derive(Debug, Clone)]
pub struct Worklog {
    pub id: i64,
    /// Tracker account id of the author.
    pub author: Option<String>,
    pub started: DateTime<Utc>,
    pub spent_seconds: i64,
}

use tracing::{error, warn};

use super::TimesheetCounts;
use crate::connectors::{PortfolioApi, TrackerApi};
use crate::model::time_entry::{TimeEntry, Worklog};
use crate::model::work_item::{AssetState, WorkItem};

/// Rendering used both when writing entry dates and when comparing them.
/// The comparison is on the rendered string, so the format must never vary
/// between the two paths.
const ENTRY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Decimal hours for a worklog duration. Shortest-roundtrip float display
/// keeps "0.5" and "1" stable across write and compare.
pub fn hours_string(spent_seconds: i64) -> String {
    (spent_seconds as f64 / 3600.0).to_string()
}

fn entry_date(worklog: &Worklog) -> String {
    worklog.started.format(ENTRY_DATE_FORMAT).to_string()
}

fn hours_differ(entry: &TimeEntry, worklog: &Worklog) -> bool {
    let expected = worklog.spent_seconds as f64 / 3600.0;
    match entry.hours.parse::<f64>() {
        Ok(current) => (current - expected).abs() != 0.0,
        Err(_) => true,
    }
}

#[derive(Debug, Default)]
pub struct WorklogPartition<'a> {
    pub new: Vec<&'a Worklog>,
    pub changed: Vec<(&'a TimeEntry, &'a Worklog)>,
    pub removed: Vec<&'a TimeEntry>,
}

/// Split one item's worklogs and time entries into the minimal write sets.
/// Correlation runs on `entry.reference == worklog.id` as strings; entries
/// without a reference are local-only and never touched.
pub fn partition<'a>(
    worklogs: &'a [Worklog],
    entries: &'a [TimeEntry],
) -> WorklogPartition<'a> {
    let mut sets = WorklogPartition::default();

    for worklog in worklogs {
        let id = worklog.id.to_string();
        match entries.iter().find(|e| e.reference == id) {
            None => sets.new.push(worklog),
            Some(entry) => {
                // A formatting difference in the date counts as a change.
                if entry.date != entry_date(worklog) || hours_differ(entry, worklog) {
                    sets.changed.push((entry, worklog));
                }
            }
        }
    }

    for entry in entries {
        if entry.reference.is_empty() || entry.hours == "0" {
            continue;
        }
        if !worklogs.iter().any(|w| w.id.to_string() == entry.reference) {
            sets.removed.push(entry);
        }
    }

    sets
}

/// Reconciles tracker worklogs against portfolio time entries for every
/// linked item. Entries are zeroed rather than deleted so the audit trail
/// survives.
pub struct TimesheetSync<'a> {
    pub portfolio: &'a dyn PortfolioApi,
    pub tracker: &'a dyn TrackerApi,
}

impl TimesheetSync<'_> {
    pub async fn run(&self, items: &[WorkItem]) -> TimesheetCounts {
        let mut counts = TimesheetCounts::default();
        for item in items {
            if !item.is_linked() || item.asset_state == AssetState::Deleted {
                continue;
            }
            if let Err(e) = self.sync_item(item, &mut counts).await {
                error!(
                    item = %item.number,
                    error = %format!("{e:#}"),
                    "timesheet sync failed, continuing with next item"
                );
            }
        }
        counts
    }

    async fn sync_item(
        &self,
        item: &WorkItem,
        counts: &mut TimesheetCounts,
    ) -> anyhow::Result<()> {
        let worklogs = self.tracker.worklogs(item.reference()).await?;
        let entries = self.portfolio.fetch_time_entries(&item.local_id).await?;
        let sets = partition(&worklogs, &entries);

        for worklog in sets.new {
            let Some(member_id) = self.resolve_author(item, worklog).await else {
                continue;
            };
            let draft = TimeEntry {
                local_id: String::new(),
                date: entry_date(worklog),
                hours: hours_string(worklog.spent_seconds),
                reference: worklog.id.to_string(),
                member_id,
                scope_id: item.scope_id.clone(),
                work_item_id: item.local_id.clone(),
            };
            let created = match self.portfolio.create_time_entry(&draft).await {
                Ok(created) => created,
                Err(e) => {
                    error!(
                        item = %item.number,
                        worklog = worklog.id,
                        error = %format!("{e:#}"),
                        "time entry create failed"
                    );
                    continue;
                }
            };
            counts.created += 1;
            let comment = format!(
                "Worklog recorded as time entry {} on {}",
                created.local_id, item.number
            );
            if let Err(e) = self.tracker.add_comment(item.reference(), &comment).await {
                warn!(
                    issue = item.reference(),
                    error = %format!("{e:#}"),
                    "time entry comment failed"
                );
            }
        }

        for (entry, worklog) in sets.changed {
            let date = entry_date(worklog);
            let hours = hours_string(worklog.spent_seconds);
            match self
                .portfolio
                .update_time_entry(&entry.local_id, Some(&date), &hours)
                .await
            {
                Ok(()) => counts.updated += 1,
                Err(e) => error!(
                    item = %item.number,
                    entry = %entry.local_id,
                    error = %format!("{e:#}"),
                    "time entry update failed"
                ),
            }
        }

        for entry in sets.removed {
            // Zero, never delete: the entry stays as a tombstone.
            match self
                .portfolio
                .update_time_entry(&entry.local_id, None, "0")
                .await
            {
                Ok(()) => counts.zeroed += 1,
                Err(e) => error!(
                    item = %item.number,
                    entry = %entry.local_id,
                    error = %format!("{e:#}"),
                    "time entry zeroing failed"
                ),
            }
        }

        Ok(())
    }

    async fn resolve_author(&self, item: &WorkItem, worklog: &Worklog) -> Option<String> {
        let Some(author) = worklog.author.as_deref() else {
            warn!(item = %item.number, worklog = worklog.id, "worklog has no author, skipping");
            return None;
        };
        match self.portfolio.resolve_member(author).await {
            Ok(Some(member)) => Some(member),
            Ok(None) => {
                warn!(
                    item = %item.number,
                    worklog = worklog.id,
                    author,
                    "worklog author has no portfolio member, skipping"
                );
                None
            }
            Err(e) => {
                warn!(
                    item = %item.number,
                    worklog = worklog.id,
                    error = %format!("{e:#}"),
                    "member lookup failed, skipping worklog"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn worklog(id: i64, spent_seconds: i64) -> Worklog {
        Worklog {
            id,
            author: Some("acct-1".into()),
            started: Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap(),
            spent_seconds,
        }
    }

    fn entry(reference: &str, date: &str, hours: &str) -> TimeEntry {
        TimeEntry {
            local_id: format!("Actual:{reference}"),
            date: date.into(),
            hours: hours.into(),
            reference: reference.into(),
            member_id: "Member:20".into(),
            scope_id: "Scope:1024".into(),
            work_item_id: "Story:1".into(),
        }
    }

    #[test]
    fn half_hour_renders_fractional() {
        assert_eq!(hours_string(1800), "0.5");
    }

    #[test]
    fn whole_hours_render_without_decimals() {
        assert_eq!(hours_string(3600), "1");
        assert_eq!(hours_string(7200), "2");
    }

    #[test]
    fn uncorrelated_worklog_is_new() {
        let logs = vec![worklog(10127, 1800)];
        let sets = partition(&logs, &[]);
        assert_eq!(sets.new.len(), 1);
        assert!(sets.changed.is_empty());
        assert!(sets.removed.is_empty());
    }

    #[test]
    fn matching_entry_is_untouched() {
        let logs = vec![worklog(10127, 1800)];
        let entries = vec![entry("10127", "2024-03-05 09:30:00", "0.5")];
        let sets = partition(&logs, &entries);
        assert!(sets.new.is_empty());
        assert!(sets.changed.is_empty());
        assert!(sets.removed.is_empty());
    }

    #[test]
    fn changed_duration_is_detected() {
        let logs = vec![worklog(10127, 3600)];
        let entries = vec![entry("10127", "2024-03-05 09:30:00", "0.5")];
        let sets = partition(&logs, &entries);
        assert!(sets.new.is_empty());
        assert_eq!(sets.changed.len(), 1);
    }

    #[test]
    fn date_formatting_difference_counts_as_change() {
        let logs = vec![worklog(10127, 1800)];
        let entries = vec![entry("10127", "2024-03-05T09:30:00", "0.5")];
        let sets = partition(&logs, &entries);
        assert_eq!(sets.changed.len(), 1);
    }

    #[test]
    fn entry_without_worklog_is_removed() {
        let entries = vec![entry("10127", "2024-03-05 09:30:00", "1")];
        let sets = partition(&[], &entries);
        assert_eq!(sets.removed.len(), 1);
    }

    #[test]
    fn zeroed_entry_is_not_removed_again() {
        let entries = vec![entry("10127", "2024-03-05 09:30:00", "0")];
        let sets = partition(&[], &entries);
        assert!(sets.removed.is_empty());
    }

    #[test]
    fn local_only_entry_is_ignored() {
        let entries = vec![entry("", "2024-03-05 09:30:00", "3")];
        let sets = partition(&[], &entries);
        assert!(sets.removed.is_empty());
    }
}

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::matching::{effective_description, fields_match_epic, find_issue, is_item_number};
use super::EntityCounts;
use crate::connectors::query::QueryClause;
use crate::connectors::{IssuePatch, NewIssue, PortfolioApi, TrackerApi};
use crate::mapping::ProjectMapping;
use crate::model::issue::{FieldCatalog, TrackerIssue, Transition};
use crate::model::work_item::{AssetState, ItemKind, WorkItem};

/// Reconciles epics. The portfolio is the source of truth: unlinked local
/// epics are pushed out, field changes are pushed out, the done state is
/// propagated through workflow transitions, and deletions flow both ways.
pub struct EpicSync<'a> {
    pub portfolio: &'a dyn PortfolioApi,
    pub tracker: &'a dyn TrackerApi,
    pub mapping: &'a ProjectMapping,
    pub catalog: &'a FieldCatalog,
}

impl EpicSync<'_> {
    pub async fn run(&self) -> Result<EntityCounts> {
        let mut counts = EntityCounts::default();

        let mut epics = self
            .portfolio
            .fetch_items(
                ItemKind::Epic,
                &self.mapping.local_project,
                self.mapping.epic_category.as_deref(),
            )
            .await
            .context("fetching local epic batch")?;
        let clauses = [
            QueryClause::eq("project", &self.mapping.tracker_project),
            QueryClause::eq("issuetype", ItemKind::Epic.issue_type()),
        ];
        let issues = self
            .tracker
            .search(&clauses, self.catalog)
            .await
            .context("fetching tracker epic batch")?;

        self.update_phase(&mut epics, &issues, &mut counts).await;
        let pushed = self.create_phase(&mut epics, &issues, &mut counts).await;
        self.close_phase(&epics, &issues, &mut counts).await;
        self.delete_phase(&mut epics, &issues, &pushed, &mut counts).await;

        Ok(counts)
    }

    async fn update_phase(
        &self,
        epics: &mut [WorkItem],
        issues: &[TrackerIssue],
        counts: &mut EntityCounts,
    ) {
        for epic in epics {
            if epic.asset_state == AssetState::Deleted {
                continue;
            }
            let Some(issue) = find_issue(epic, issues) else {
                continue;
            };

            // The done state is owned locally: an open epic whose issue
            // went done gets transitioned back.
            if self.mapping.is_done(&issue.status) && epic.asset_state == AssetState::Active {
                if self.reopen_issue(epic, issue).await {
                    counts.reopened += 1;
                }
            }

            if fields_match_epic(epic, issue, self.mapping) {
                continue;
            }
            if let Err(e) = self.push_fields(epic, issue).await {
                error!(
                    epic = %epic.number,
                    issue = %issue.key,
                    error = %format!("{e:#}"),
                    "epic update failed, continuing with next epic"
                );
                continue;
            }
            epic.reference = Some(issue.key.clone());
            counts.updated += 1;
        }
    }

    /// Push local field values onto the issue, merging the number into the
    /// existing label set.
    async fn push_fields(&self, epic: &WorkItem, issue: &TrackerIssue) -> Result<()> {
        if !epic.is_linked() {
            self.portfolio
                .set_reference(&epic.local_id, &issue.key)
                .await
                .context("repairing missing reference")?;
        }

        let mut labels: Vec<String> = issue
            .labels
            .iter()
            .filter(|l| !is_item_number(l))
            .cloned()
            .collect();
        labels.push(epic.number.clone());

        let patch = IssuePatch {
            summary: Some(epic.name.clone()),
            description: Some(effective_description(epic).to_string()),
            priority: self
                .mapping
                .tracker_priority(epic.priority.as_deref().unwrap_or("")),
            labels: Some(labels),
        };
        self.tracker
            .update_issue(&issue.key, &patch)
            .await
            .context("pushing field update")
    }

    /// Transition a done issue back to an open state. True on success.
    async fn reopen_issue(&self, epic: &WorkItem, issue: &TrackerIssue) -> bool {
        let transitions = match self.tracker.transitions(&issue.key).await {
            Ok(t) => t,
            Err(e) => {
                warn!(issue = %issue.key, error = %format!("{e:#}"), "transition fetch failed");
                return false;
            }
        };
        let Some(transition) = transitions
            .iter()
            .find(|t| !self.mapping.is_done(&t.to_status))
        else {
            error!(issue = %issue.key, "no open transition available, cannot reopen");
            return false;
        };

        if let Err(e) = self.tracker.run_transition(&issue.key, &transition.id).await {
            error!(issue = %issue.key, error = %format!("{e:#}"), "reopen transition failed");
            return false;
        }
        let comment = format!("Reopened: epic {} is still open in the portfolio", epic.number);
        if let Err(e) = self.tracker.add_comment(&issue.key, &comment).await {
            warn!(issue = %issue.key, error = %format!("{e:#}"), "reopen comment failed");
        }
        true
    }

    /// Returns the local ids pushed this cycle; their new keys are not in
    /// the batch, so the delete phase must not treat them as orphans.
    async fn create_phase(
        &self,
        epics: &mut [WorkItem],
        issues: &[TrackerIssue],
        counts: &mut EntityCounts,
    ) -> HashSet<String> {
        let mut pushed = HashSet::new();
        for epic in epics {
            if epic.asset_state != AssetState::Active || epic.is_linked() {
                continue;
            }
            if find_issue(epic, issues).is_some() {
                // Already pushed once; the update phase repaired the link.
                continue;
            }
            match self.push_epic(epic).await {
                Ok(key) => {
                    epic.reference = Some(key);
                    pushed.insert(epic.local_id.clone());
                    counts.created += 1;
                }
                Err(e) => {
                    // Likely causes: the project has no Epic issue type, or
                    // the epic-name field is missing from its create screen.
                    error!(
                        epic = %epic.number,
                        error = %format!("{e:#}"),
                        "epic create failed; check the tracker project's epic \
                         issue type and epic-name field"
                    );
                }
            }
        }
        pushed
    }

    /// Create the tracker counterpart of one local epic and wire up both
    /// sides. The reference write-back happens first; link decorations are
    /// best-effort.
    async fn push_epic(&self, epic: &WorkItem) -> Result<String> {
        if self.catalog.epic_name.is_none() {
            warn!(
                epic = %epic.number,
                "tracker has no epic-name field, pushing without it"
            );
        }
        let new_issue = NewIssue {
            project: self.mapping.tracker_project.clone(),
            issue_type: ItemKind::Epic.issue_type().to_string(),
            summary: epic.name.clone(),
            description: effective_description(epic).to_string(),
            epic_name: Some(epic.number.clone()),
            priority: self
                .mapping
                .tracker_priority(epic.priority.as_deref().unwrap_or("")),
            labels: vec![epic.number.clone()],
        };
        let key = self
            .tracker
            .create_issue(&new_issue, self.catalog)
            .await
            .context("creating tracker epic")?;

        self.portfolio
            .set_reference(&epic.local_id, &key)
            .await
            .with_context(|| {
                format!(
                    "reference write-back failed after creating {key}; \
                     the epic stays a create candidate and may duplicate"
                )
            })?;

        let comment = format!("Created from {} ({})", epic.number, epic.scope_name);
        if let Err(e) = self.tracker.add_comment(&key, &comment).await {
            warn!(issue = %key, error = %format!("{e:#}"), "linkback comment failed");
        }
        let item_url = self.portfolio.item_url(&epic.number);
        if let Err(e) = self.tracker.add_web_link(&key, &item_url, &epic.number).await {
            warn!(issue = %key, error = %format!("{e:#}"), "linkback web link failed");
        }
        if let Err(e) = self
            .portfolio
            .add_link(&epic.local_id, &self.tracker.issue_url(&key), &key)
            .await
        {
            warn!(epic = %epic.number, error = %format!("{e:#}"), "portfolio link failed");
        }

        info!(epic = %epic.number, issue = %key, "epic pushed to tracker");
        Ok(key)
    }

    /// Propagate locally closed epics to the tracker's done state.
    async fn close_phase(
        &self,
        epics: &[WorkItem],
        issues: &[TrackerIssue],
        counts: &mut EntityCounts,
    ) {
        for epic in epics {
            if epic.asset_state != AssetState::Closed || !epic.is_linked() {
                continue;
            }
            let Some(issue) = issues.iter().find(|i| i.key == epic.reference()) else {
                continue;
            };
            if self.mapping.is_done(&issue.status) {
                // Already consistent; transitioning again would bounce the
                // issue through its workflow.
                continue;
            }

            let transitions = match self.tracker.transitions(&issue.key).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(issue = %issue.key, error = %format!("{e:#}"), "transition fetch failed");
                    continue;
                }
            };
            let candidates: Vec<&Transition> = transitions
                .iter()
                .filter(|t| self.mapping.is_done(&t.to_status))
                .collect();
            let Some(transition) = exactly_one(&candidates, &issue.key, "done") else {
                continue;
            };

            if let Err(e) = self.tracker.run_transition(&issue.key, &transition.id).await {
                error!(issue = %issue.key, error = %format!("{e:#}"), "done transition failed");
                continue;
            }
            let comment = format!("Closed to match epic {}", epic.number);
            if let Err(e) = self.tracker.add_comment(&issue.key, &comment).await {
                warn!(issue = %issue.key, error = %format!("{e:#}"), "close comment failed");
            }
            counts.closed += 1;
        }
    }

    async fn delete_phase(
        &self,
        epics: &mut [WorkItem],
        issues: &[TrackerIssue],
        pushed: &HashSet<String>,
        counts: &mut EntityCounts,
    ) {
        // Local epics whose issue vanished tracker-side.
        for epic in epics {
            if epic.asset_state != AssetState::Active || !epic.is_linked() {
                continue;
            }
            if pushed.contains(&epic.local_id) {
                continue;
            }
            if issues.iter().any(|i| i.key == epic.reference()) {
                continue;
            }
            match self.tracker.get_issue(epic.reference(), self.catalog).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    if let Err(e) = self.portfolio.run_operation(&epic.local_id, "Delete").await
                    {
                        error!(epic = %epic.number, error = %format!("{e:#}"), "orphan delete failed");
                        continue;
                    }
                    epic.asset_state = AssetState::Deleted;
                    counts.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        epic = %epic.number,
                        reference = epic.reference(),
                        error = %format!("{e:#}"),
                        "existence check failed, keeping epic"
                    );
                }
            }
        }

        // Locally deleted epics still carrying a reference: remove the
        // tracker issue, then clear the reference. The portfolio delete is
        // reversible, so the record is briefly undeleted to accept the
        // write.
        let tombstones = match self
            .portfolio
            .fetch_deleted_items(ItemKind::Epic, &self.mapping.local_project)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "deleted epic fetch failed, skipping cleanup");
                return;
            }
        };
        for epic in tombstones {
            if !epic.is_linked() {
                continue;
            }
            if let Err(e) = self.clear_tombstone(&epic).await {
                error!(epic = %epic.number, error = %format!("{e:#}"), "tombstone cleanup failed");
                continue;
            }
            counts.deleted += 1;
        }
    }

    async fn clear_tombstone(&self, epic: &WorkItem) -> Result<()> {
        let reference = epic.reference();
        match self.tracker.get_issue(reference, self.catalog).await? {
            Some(_) => {
                self.tracker
                    .delete_issue(reference)
                    .await
                    .context("deleting tracker epic")?;
            }
            None => debug!(epic = %epic.number, issue = reference, "tracker epic already gone"),
        }
        self.portfolio
            .run_operation(&epic.local_id, "Undelete")
            .await
            .context("undeleting epic for reference clear")?;
        self.portfolio
            .clear_reference(&epic.local_id)
            .await
            .context("clearing reference")?;
        self.portfolio
            .run_operation(&epic.local_id, "Delete")
            .await
            .context("re-deleting epic")?;
        Ok(())
    }
}

/// Pick the only candidate, or log the ambiguity and decline. Picking an
/// arbitrary transition from an ambiguous set would move issues through
/// workflows nobody asked for.
fn exactly_one<'a>(
    candidates: &[&'a Transition],
    issue_key: &str,
    target: &str,
) -> Option<&'a Transition> {
    match candidates {
        [only] => Some(*only),
        [] => {
            error!(issue = issue_key, target, "no matching transition, skipping");
            None
        }
        _ => {
            let names: Vec<&str> = candidates.iter().map(|t| t.name.as_str()).collect();
            error!(
                issue = issue_key,
                target,
                candidates = %names.join(", "),
                "ambiguous transitions, skipping"
            );
            None
        }
    }
}

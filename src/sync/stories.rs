use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use super::matching::{fields_match_child, find_local, find_local_index, is_item_number};
use super::{ChildOutcome, EntityCounts};
use crate::connectors::query::QueryClause;
use crate::connectors::{IssuePatch, ItemPatch, OwnerDelta, PortfolioApi, TrackerApi};
use crate::mapping::ProjectMapping;
use crate::model::issue::{FieldCatalog, TrackerIssue};
use crate::model::work_item::{AssetState, ItemKind, WorkItem};

/// Reconciles stories or defects. The tracker is the source of truth:
/// unmatched issues become portfolio items, matched pairs are updated
/// portfolio-side, and portfolio orphans are deleted once the tracker
/// confirms the issue is gone.
pub struct ChildSync<'a> {
    pub portfolio: &'a dyn PortfolioApi,
    pub tracker: &'a dyn TrackerApi,
    pub mapping: &'a ProjectMapping,
    pub catalog: &'a FieldCatalog,
    pub kind: ItemKind,
    pub run_from: &'a str,
}

impl ChildSync<'_> {
    pub async fn run(&self) -> Result<ChildOutcome> {
        let mut counts = EntityCounts::default();

        let epics = self
            .portfolio
            .fetch_items(ItemKind::Epic, &self.mapping.local_project, None)
            .await
            .context("fetching epics for parent resolution")?;
        let mut items = self
            .portfolio
            .fetch_items(self.kind, &self.mapping.local_project, None)
            .await
            .with_context(|| format!("fetching local {} batch", self.kind))?;

        let mut clauses = vec![
            QueryClause::eq("project", &self.mapping.tracker_project),
            QueryClause::eq("issuetype", self.kind.issue_type()),
        ];
        if !self.run_from.is_empty() {
            clauses.push(QueryClause::ge("created", self.run_from));
        }
        let issues = self
            .tracker
            .search(&clauses, self.catalog)
            .await
            .with_context(|| format!("fetching tracker {} batch", self.kind))?;

        self.update_phase(&issues, &mut items, &epics, &mut counts).await;
        self.create_phase(&issues, &mut items, &epics, &mut counts).await;
        self.delete_phase(&issues, &mut items, &mut counts).await;

        Ok(ChildOutcome { counts, items })
    }

    async fn update_phase(
        &self,
        issues: &[TrackerIssue],
        items: &mut [WorkItem],
        epics: &[WorkItem],
        counts: &mut EntityCounts,
    ) {
        for issue in issues {
            let Some(pos) = find_local_index(issue, items) else {
                continue;
            };
            let local = items[pos].clone();
            if local.asset_state == AssetState::Deleted {
                continue;
            }
            if fields_match_child(&local, issue, self.mapping) {
                continue;
            }
            match self.apply_update(&local, issue, epics, counts).await {
                Ok(updated) => items[pos] = updated,
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        issue = %issue.key,
                        item = %local.number,
                        error = %format!("{e:#}"),
                        "update failed, continuing with next item"
                    );
                }
            }
        }
    }

    /// Apply one matched pair's update. Returns the item as the portfolio
    /// side now sees it, so later phases work against fresh state.
    async fn apply_update(
        &self,
        local: &WorkItem,
        issue: &TrackerIssue,
        epics: &[WorkItem],
        counts: &mut EntityCounts,
    ) -> Result<WorkItem> {
        let mut updated = local.clone();

        // Repair a half-persisted link before anything else.
        if !local.is_linked() {
            self.portfolio
                .set_reference(&local.local_id, &issue.key)
                .await
                .context("repairing missing reference")?;
            updated.reference = Some(issue.key.clone());
        }

        let done = self.mapping.is_done(&issue.status);

        // A closed record cannot accept field writes; reopen it first.
        if local.asset_state == AssetState::Closed && !done {
            self.portfolio
                .run_operation(&local.local_id, "Reactivate")
                .await
                .context("reopening closed item")?;
            updated.asset_state = AssetState::Active;
            counts.reopened += 1;
        }

        let mut patch = ItemPatch {
            name: Some(issue.summary.clone()),
            description: Some(issue.description.clone()),
            status: self.mapping.local_status(&issue.status),
            priority: issue
                .priority
                .as_deref()
                .and_then(|p| self.mapping.local_priority(p)),
            parent: None,
            estimate: issue.story_points.map(|p| p.to_string()),
            to_do: issue.remaining_seconds.map(super::timesheets::hours_string),
        };

        match issue.parent_link.as_deref() {
            Some(link) => match epics.iter().find(|e| e.reference() == link) {
                Some(epic) if epic.asset_state == AssetState::Closed => {
                    // Other field changes still go through.
                    warn!(
                        kind = %self.kind,
                        issue = %issue.key,
                        epic = %epic.number,
                        "parent epic is closed, skipping parent link write"
                    );
                }
                Some(epic) => {
                    if local.parent_reference.as_deref() != Some(link) {
                        patch.parent = Some(epic.local_id.clone());
                        updated.parent_reference = Some(link.to_string());
                    }
                }
                None => warn!(
                    kind = %self.kind,
                    issue = %issue.key,
                    parent = link,
                    "parent epic not found in scope, skipping parent link write"
                ),
            },
            None => {}
        }

        self.portfolio
            .update_item(&local.local_id, &patch)
            .await
            .context("applying field update")?;
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(status) = patch.status {
            updated.status = Some(status);
        }
        if let Some(priority) = patch.priority {
            updated.priority = Some(priority);
        }
        counts.updated += 1;

        if let Some(delta) = self.owner_delta(local, issue).await {
            if let Err(e) = self.portfolio.update_owners(&local.local_id, &delta).await {
                warn!(
                    kind = %self.kind,
                    issue = %issue.key,
                    error = %format!("{e:#}"),
                    "owner update failed"
                );
            } else {
                updated.owner_ids.retain(|o| !delta.remove.contains(o));
                updated.owner_ids.extend(delta.add.iter().cloned());
            }
        }

        if done && updated.asset_state != AssetState::Closed {
            self.portfolio
                .run_operation(&local.local_id, "Inactivate")
                .await
                .context("closing item")?;
            updated.asset_state = AssetState::Closed;
            counts.closed += 1;
        }

        Ok(updated)
    }

    /// Owner changes as an add/remove list against the current owner set.
    /// None means nothing to change (or no resolvable assignee).
    async fn owner_delta(&self, local: &WorkItem, issue: &TrackerIssue) -> Option<OwnerDelta> {
        let assignee = issue.assignee.as_deref()?;
        let member = match self.portfolio.resolve_member(assignee).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                debug!(issue = %issue.key, assignee, "assignee has no portfolio member");
                return None;
            }
            Err(e) => {
                warn!(issue = %issue.key, error = %format!("{e:#}"), "member lookup failed");
                return None;
            }
        };

        let mut delta = OwnerDelta::default();
        if !local.owner_ids.iter().any(|o| o == &member) {
            delta.add.push(member.clone());
        }
        delta.remove = local
            .owner_ids
            .iter()
            .filter(|o| o.as_str() != member)
            .cloned()
            .collect();
        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    async fn create_phase(
        &self,
        issues: &[TrackerIssue],
        items: &mut Vec<WorkItem>,
        epics: &[WorkItem],
        counts: &mut EntityCounts,
    ) {
        for issue in issues {
            if find_local(issue, items).is_some() {
                continue;
            }
            match self.create_from_issue(issue, epics).await {
                Ok(Some(created)) => {
                    counts.created += 1;
                    items.push(created);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        issue = %issue.key,
                        error = %format!("{e:#}"),
                        "create failed, continuing with next issue"
                    );
                }
            }
        }
    }

    async fn create_from_issue(
        &self,
        issue: &TrackerIssue,
        epics: &[WorkItem],
    ) -> Result<Option<WorkItem>> {
        let mut parent_id = None;
        if let Some(link) = issue.parent_link.as_deref() {
            match epics.iter().find(|e| e.reference() == link) {
                Some(epic) if epic.asset_state == AssetState::Closed => {
                    error!(
                        kind = %self.kind,
                        issue = %issue.key,
                        epic = %epic.number,
                        "parent epic is closed, not creating"
                    );
                    return Ok(None);
                }
                Some(epic) => parent_id = Some(epic.local_id.clone()),
                None => warn!(
                    kind = %self.kind,
                    issue = %issue.key,
                    parent = link,
                    "parent epic not found in scope, creating without parent"
                ),
            }
        }

        let mut owner_ids = Vec::new();
        if let Some(assignee) = issue.assignee.as_deref() {
            match self.portfolio.resolve_member(assignee).await? {
                Some(member) => owner_ids.push(member),
                None => warn!(
                    issue = %issue.key,
                    assignee,
                    "assignee has no portfolio member, creating unowned"
                ),
            }
        }

        let draft = WorkItem {
            name: issue.summary.clone(),
            description: issue.description.clone(),
            scope_id: self.mapping.local_project.clone(),
            reference: Some(issue.key.clone()),
            status: self.mapping.local_status(&issue.status),
            priority: issue
                .priority
                .as_deref()
                .and_then(|p| self.mapping.local_priority(p)),
            parent_reference: issue.parent_link.clone(),
            owner_ids,
            ..WorkItem::default()
        };

        let mut created = self
            .portfolio
            .create_item(self.kind, &draft)
            .await
            .context("creating portfolio item")?;

        // Parent and estimates go in a follow-up write; the create payload
        // itself carries only the plain fields.
        let followup = ItemPatch {
            parent: parent_id,
            estimate: issue.story_points.map(|p| p.to_string()),
            to_do: issue.remaining_seconds.map(super::timesheets::hours_string),
            ..ItemPatch::default()
        };
        if !followup.is_empty() {
            if let Err(e) = self.portfolio.update_item(&created.local_id, &followup).await {
                warn!(
                    item = %created.number,
                    error = %format!("{e:#}"),
                    "follow-up field write failed after create"
                );
            }
        }
        created.asset_state = AssetState::Active;

        // Write the new number back onto the issue: stale number labels go,
        // ordinary labels stay.
        let mut labels: Vec<String> = issue
            .labels
            .iter()
            .filter(|l| !is_item_number(l))
            .cloned()
            .collect();
        labels.push(created.number.clone());
        let patch = IssuePatch {
            labels: Some(labels),
            ..IssuePatch::default()
        };
        if let Err(e) = self.tracker.update_issue(&issue.key, &patch).await {
            warn!(
                issue = %issue.key,
                error = %format!("{e:#}"),
                "number label write-back failed, link will be repaired next cycle"
            );
        }

        let comment = format!(
            "Linked to portfolio item {} in {}",
            created.number, self.mapping.local_project
        );
        if let Err(e) = self.tracker.add_comment(&issue.key, &comment).await {
            warn!(issue = %issue.key, error = %format!("{e:#}"), "linkback comment failed");
        }
        let item_url = self.portfolio.item_url(&created.number);
        if let Err(e) = self
            .tracker
            .add_web_link(&issue.key, &item_url, &created.number)
            .await
        {
            warn!(issue = %issue.key, error = %format!("{e:#}"), "linkback web link failed");
        }
        if let Err(e) = self
            .portfolio
            .add_link(&created.local_id, &self.tracker.issue_url(&issue.key), &issue.key)
            .await
        {
            warn!(item = %created.number, error = %format!("{e:#}"), "portfolio link failed");
        }

        Ok(Some(created))
    }

    async fn delete_phase(
        &self,
        issues: &[TrackerIssue],
        items: &mut [WorkItem],
        counts: &mut EntityCounts,
    ) {
        for item in items {
            if item.asset_state != AssetState::Active || !item.is_linked() {
                continue;
            }
            if issues.iter().any(|i| i.key == item.reference()) {
                continue;
            }
            // The batch may be incomplete; only a direct confirmed absence
            // justifies the delete.
            match self.tracker.get_issue(item.reference(), self.catalog).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    if let Err(e) = self.portfolio.run_operation(&item.local_id, "Delete").await
                    {
                        error!(
                            kind = %self.kind,
                            item = %item.number,
                            error = %format!("{e:#}"),
                            "orphan delete failed"
                        );
                        continue;
                    }
                    item.asset_state = AssetState::Deleted;
                    counts.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        kind = %self.kind,
                        item = %item.number,
                        reference = item.reference(),
                        error = %format!("{e:#}"),
                        "existence check failed, keeping item"
                    );
                }
            }
        }
    }
}

pub mod epics;
pub mod matching;
pub mod stories;
pub mod timesheets;


use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::connectors::{PortfolioApi, TrackerApi};
use crate::mapping::ProjectMapping;
use crate::model::work_item::{ItemKind, WorkItem};
use epics::EpicSync;
use stories::ChildSync;
use timesheets::TimesheetSync;

/// Per-entity-kind write counters for one project pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
    pub closed: usize,
    pub reopened: usize,
    pub deleted: usize,
}

impl EntityCounts {
    fn merge(&mut self, other: &EntityCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.closed += other.closed;
        self.reopened += other.reopened;
        self.deleted += other.deleted;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimesheetCounts {
    pub created: usize,
    pub updated: usize,
    pub zeroed: usize,
}

/// A child worker's result: counters plus the local batch as the phases
/// left it, so the timesheet pass works against fresh state.
pub struct ChildOutcome {
    pub counts: EntityCounts,
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Default)]
pub struct PairReport {
    pub pair: String,
    pub epics: EntityCounts,
    pub stories: EntityCounts,
    pub defects: EntityCounts,
    pub timesheets: TimesheetCounts,
    /// Set when a phase-level failure cut the pair short.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub pairs: Vec<PairReport>,
}

impl CycleReport {
    pub fn failed_pairs(&self) -> usize {
        self.pairs.iter().filter(|p| p.error.is_some()).count()
    }

    /// Work-item counters summed over every pair and entity kind.
    pub fn totals(&self) -> EntityCounts {
        let mut totals = EntityCounts::default();
        for pair in &self.pairs {
            totals.merge(&pair.epics);
            totals.merge(&pair.stories);
            totals.merge(&pair.defects);
        }
        totals
    }
}

/// Runs the reconciliation cycle: every enabled project pair concurrently,
/// phases within a pair strictly in order. The engine holds no state
/// between cycles; the two stores are the only durable state.
pub struct SyncEngine {
    portfolio: Arc<dyn PortfolioApi>,
    tracker: Arc<dyn TrackerApi>,
    run_from: String,
}

impl SyncEngine {
    pub fn new(
        portfolio: Arc<dyn PortfolioApi>,
        tracker: Arc<dyn TrackerApi>,
        run_from: String,
    ) -> Self {
        Self {
            portfolio,
            tracker,
            run_from,
        }
    }

    pub async fn run_cycle(&self, mappings: &[ProjectMapping]) -> CycleReport {
        let enabled: Vec<&ProjectMapping> = mappings.iter().filter(|m| m.enabled).collect();
        info!(pairs = enabled.len(), "cycle starting");

        let reports = join_all(enabled.iter().map(|m| self.run_pair(m))).await;

        let report = CycleReport { pairs: reports };
        for pair in &report.pairs {
            if let Some(error) = &pair.error {
                warn!(pair = %pair.pair, error = %error, "pair completed with failure");
            }
        }
        let totals = report.totals();
        info!(
            pairs = report.pairs.len(),
            failed = report.failed_pairs(),
            created = totals.created,
            updated = totals.updated,
            closed = totals.closed,
            reopened = totals.reopened,
            deleted = totals.deleted,
            "cycle complete"
        );
        report
    }

    async fn run_pair(&self, mapping: &ProjectMapping) -> PairReport {
        let mut report = PairReport {
            pair: mapping.label(),
            ..PairReport::default()
        };
        if let Err(e) = self.run_pair_phases(mapping, &mut report).await {
            error!(
                pair = %mapping.label(),
                error = %format!("{e:#}"),
                "project pair failed, remaining phases skipped"
            );
            report.error = Some(format!("{e:#}"));
        }
        report
    }

    async fn run_pair_phases(
        &self,
        mapping: &ProjectMapping,
        report: &mut PairReport,
    ) -> Result<()> {
        let catalog = self
            .tracker
            .field_catalog()
            .await
            .context("resolving tracker field catalog")?;

        report.epics = EpicSync {
            portfolio: self.portfolio.as_ref(),
            tracker: self.tracker.as_ref(),
            mapping,
            catalog: &catalog,
        }
        .run()
        .await?;
        log_counts(mapping, ItemKind::Epic, &report.epics);

        let stories = ChildSync {
            portfolio: self.portfolio.as_ref(),
            tracker: self.tracker.as_ref(),
            mapping,
            catalog: &catalog,
            kind: ItemKind::Story,
            run_from: &self.run_from,
        }
        .run()
        .await?;
        report.stories = stories.counts;
        log_counts(mapping, ItemKind::Story, &report.stories);

        let defects = ChildSync {
            portfolio: self.portfolio.as_ref(),
            tracker: self.tracker.as_ref(),
            mapping,
            catalog: &catalog,
            kind: ItemKind::Defect,
            run_from: &self.run_from,
        }
        .run()
        .await?;
        report.defects = defects.counts;
        log_counts(mapping, ItemKind::Defect, &report.defects);

        let mut tracked = stories.items;
        tracked.extend(defects.items);
        report.timesheets = TimesheetSync {
            portfolio: self.portfolio.as_ref(),
            tracker: self.tracker.as_ref(),
        }
        .run(&tracked)
        .await;
        info!(
            pair = %mapping.label(),
            created = report.timesheets.created,
            updated = report.timesheets.updated,
            zeroed = report.timesheets.zeroed,
            "timesheets reconciled"
        );

        Ok(())
    }
}

fn log_counts(mapping: &ProjectMapping, kind: ItemKind, counts: &EntityCounts) {
    info!(
        pair = %mapping.label(),
        kind = %kind,
        created = counts.created,
        updated = counts.updated,
        closed = counts.closed,
        reopened = counts.reopened,
        deleted = counts.deleted,
        "phase sequence complete"
    );
}

//! Materializes per-agent sums of a finer tier into a summary tier.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{SummaryError, SummaryResult};
use crate::models::{Filter, Table, Tier};
use crate::period::Period;
use crate::store::{StoreTx, SummaryStore};

/// What to do when the target period already has summary rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Leave the existing rows alone and report a skip.
    #[default]
    Keep,
    /// Replace the existing rows with freshly computed ones.
    Overwrite,
    /// Fail with [`SummaryError::ConflictExists`].
    Reject,
}

impl FromStr for ConflictPolicy {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep" | "skip" | "manter" | "pular" => Ok(ConflictPolicy::Keep),
            "overwrite" | "sobrescrever" => Ok(ConflictPolicy::Overwrite),
            "reject" => Ok(ConflictPolicy::Reject),
            other => Err(SummaryError::InvalidPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Keep => write!(f, "keep"),
            ConflictPolicy::Overwrite => write!(f, "overwrite"),
            ConflictPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// One regeneration request: rebuild `target` for `period` from its source tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationJob {
    pub target: Tier,
    pub period: Period,
    pub agent_id: Option<i32>,
}

impl AggregationJob {
    pub fn new(target: Tier, period: Period) -> Self {
        Self {
            target,
            period,
            agent_id: None,
        }
    }

    pub fn for_agent(mut self, agent_id: i32) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn source(&self) -> Table {
        self.target.source()
    }

    /// Rows read from the source tier: everything whose key falls in the period.
    fn source_filter(&self) -> Filter {
        Filter {
            period: self.period,
            agent_id: self.agent_id,
        }
    }

    /// Rows of the target tier sharing this job's period key.
    fn target_filter(&self) -> Filter {
        Filter {
            period: Period::day(self.period.start),
            agent_id: self.agent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Summaries were written; `replaced` rows were deleted beforehand.
    Written { replaced: u64 },
    /// The source tier had nothing in range. Nothing was written.
    NoSourceData,
    /// Summaries already existed and the policy kept them.
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    pub tier: Tier,
    pub period: Period,
    pub policy: ConflictPolicy,
    pub source_rows_found: i64,
    pub existing_rows: i64,
    pub summary_rows_written: u64,
    pub outcome: Outcome,
}

impl AggregationReport {
    pub fn wrote_rows(&self) -> bool {
        matches!(self.outcome, Outcome::Written { .. })
    }
}

/// Runs `job` in its own transaction and commits it.
pub async fn aggregate<S: SummaryStore>(
    store: &S,
    job: AggregationJob,
    policy: ConflictPolicy,
) -> SummaryResult<AggregationReport> {
    let mut tx = store.begin().await?;
    let report = aggregate_in(&mut tx, job, policy).await?;
    if report.wrote_rows() {
        tx.commit().await?;
    }
    Ok(report)
}

/// Runs `job` inside a caller-owned transaction. Nothing is committed here.
pub async fn aggregate_in<T: StoreTx>(
    tx: &mut T,
    job: AggregationJob,
    policy: ConflictPolicy,
) -> SummaryResult<AggregationReport> {
    let source = job.source();
    let source_rows_found = tx.count(source, &job.source_filter()).await?;
    let mut report = AggregationReport {
        tier: job.target,
        period: job.period,
        policy,
        source_rows_found,
        existing_rows: 0,
        summary_rows_written: 0,
        outcome: Outcome::NoSourceData,
    };

    if source_rows_found == 0 {
        info!(
            tier = %job.target,
            start = %job.period.start,
            end = %job.period.end,
            "no {source} rows in range, nothing to aggregate"
        );
        return Ok(report);
    }

    let target_filter = job.target_filter();
    report.existing_rows = tx.count(Table::Summary(job.target), &target_filter).await?;

    let mut replaced = 0;
    if report.existing_rows > 0 {
        match policy {
            ConflictPolicy::Keep => {
                info!(
                    tier = %job.target,
                    start = %job.period.start,
                    existing = report.existing_rows,
                    "summary already exists, keeping it"
                );
                report.outcome = Outcome::AlreadyExists;
                return Ok(report);
            }
            ConflictPolicy::Reject => {
                return Err(SummaryError::ConflictExists {
                    tier: job.target,
                    period_start: job.period.start,
                    existing: report.existing_rows,
                });
            }
            ConflictPolicy::Overwrite => {
                replaced = tx.delete(job.target, &target_filter).await?;
                debug!(tier = %job.target, replaced, "deleted existing summaries");
            }
        }
    }

    let totals = tx.grouped_sums(source, &job.source_filter()).await?;
    report.summary_rows_written = tx.insert_rows(job.target, job.period, &totals).await?;
    report.outcome = Outcome::Written { replaced };

    info!(
        tier = %job.target,
        start = %job.period.start,
        end = %job.period.end,
        source_rows = report.source_rows_found,
        written = report.summary_rows_written,
        replaced,
        "summary regenerated"
    );
    Ok(report)
}

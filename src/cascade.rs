use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{aggregate, AggregationJob, AggregationReport, ConflictPolicy};
use crate::error::SummaryResult;
use crate::models::Tier;
use crate::period::{self, Period};
use crate::store::SummaryStore;

/// How the caller identified the month to regenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthSelector {
    Containing(NaiveDate),
    Explicit { month: u32, year: i32 },
}

impl MonthSelector {
    pub fn bounds(self) -> SummaryResult<Period> {
        match self {
            MonthSelector::Containing(reference) => Ok(period::month_bounds(reference)),
            MonthSelector::Explicit { month, year } => period::month_bounds_from_parts(month, year),
        }
    }
}

pub async fn regenerate_daily<S: SummaryStore>(
    store: &S,
    date: NaiveDate,
    policy: ConflictPolicy,
) -> SummaryResult<AggregationReport> {
    aggregate(store, AggregationJob::new(Tier::Daily, Period::day(date)), policy).await
}

pub async fn regenerate_weekly<S: SummaryStore>(
    store: &S,
    reference: NaiveDate,
    policy: ConflictPolicy,
) -> SummaryResult<AggregationReport> {
    let week = period::week_bounds(reference);
    aggregate(store, AggregationJob::new(Tier::Weekly, week), policy).await
}

pub async fn regenerate_monthly<S: SummaryStore>(
    store: &S,
    month: MonthSelector,
    policy: ConflictPolicy,
) -> SummaryResult<AggregationReport> {
    let bounds = month.bounds()?;
    aggregate(store, AggregationJob::new(Tier::Monthly, bounds), policy).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierStatus {
    Completed(AggregationReport),
    Failed { error: String },
    NotRun { reason: String },
}

impl TierStatus {
    pub fn report(&self) -> Option<&AggregationReport> {
        match self {
            TierStatus::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TierStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub reference_date: NaiveDate,
    pub week: Period,
    pub month: Period,
    pub weekly: TierStatus,
    pub monthly: TierStatus,
}

impl CascadeReport {
    pub fn source_rows_found(&self) -> i64 {
        [&self.weekly, &self.monthly]
            .iter()
            .filter_map(|status| status.report())
            .map(|report| report.source_rows_found)
            .sum()
    }

    pub fn summary_rows_written(&self) -> u64 {
        [&self.weekly, &self.monthly]
            .iter()
            .filter_map(|status| status.report())
            .map(|report| report.summary_rows_written)
            .sum()
    }

    pub fn has_failures(&self) -> bool {
        self.weekly.is_failed() || self.monthly.is_failed()
    }
}

/// Regenerates the week and then the month containing `reference`.
///
/// The weekly transaction commits before monthly aggregation starts, since the
/// monthly tier reads weekly rows. Monthly is not attempted when the weekly tier
/// failed.
pub async fn regenerate_all<S: SummaryStore>(
    store: &S,
    reference: NaiveDate,
    policy: ConflictPolicy,
) -> CascadeReport {
    let week = period::week_bounds(reference);
    let month = period::month_bounds(reference);

    let weekly = match regenerate_weekly(store, reference, policy).await {
        Ok(report) => TierStatus::Completed(report),
        Err(err) => {
            warn!(tier = %Tier::Weekly, error = %err, "weekly regeneration failed");
            TierStatus::Failed {
                error: err.to_string(),
            }
        }
    };

    // Monthly reads every weekly row of the month, so an empty reference week
    // does not mean the month has nothing to roll up.
    let monthly = match &weekly {
        TierStatus::Failed { .. } => TierStatus::NotRun {
            reason: "weekly regeneration failed".to_string(),
        },
        _ => match regenerate_monthly(store, MonthSelector::Containing(reference), policy).await {
            Ok(report) => TierStatus::Completed(report),
            Err(err) => {
                warn!(tier = %Tier::Monthly, error = %err, "monthly regeneration failed");
                TierStatus::Failed {
                    error: err.to_string(),
                }
            }
        },
    };

    let report = CascadeReport {
        reference_date: reference,
        week,
        month,
        weekly,
        monthly,
    };
    info!(
        reference = %reference,
        source_rows = report.source_rows_found(),
        written = report.summary_rows_written(),
        failed = report.has_failures(),
        "cascade finished"
    );
    report
}

use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{SummaryError, SummaryResult};
use crate::models::{Filter, Table, Tier};
use crate::period::{self, Period};
use crate::store::{StoreTx, SummaryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn tier(self) -> Tier {
        match self {
            PeriodType::Weekly => Tier::Weekly,
            PeriodType::Monthly => Tier::Monthly,
        }
    }

    pub fn bounds(self, reference: NaiveDate) -> Period {
        match self {
            PeriodType::Weekly => period::week_bounds(reference),
            PeriodType::Monthly => period::month_bounds(reference),
        }
    }
}

impl FromStr for PeriodType {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" | "semanal" => Ok(PeriodType::Weekly),
            "monthly" | "mensal" => Ok(PeriodType::Monthly),
            _ => Err(SummaryError::InvalidPeriodType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub period_type: PeriodType,
    pub period_bounds: Period,
    pub source_row_count: i64,
    pub summary_already_exists: bool,
}

impl Availability {
    /// Regeneration only makes sense when the source tier has rows.
    pub fn available(&self) -> bool {
        self.source_row_count > 0
    }
}

/// Reports whether `period_type` can be regenerated for the period containing
/// `reference`. Never writes; the transaction is dropped uncommitted.
pub async fn check_availability<S: SummaryStore>(
    store: &S,
    period_type: PeriodType,
    reference: NaiveDate,
) -> SummaryResult<Availability> {
    let tier = period_type.tier();
    let bounds = period_type.bounds(reference);

    let mut tx = store.begin().await?;
    let source_row_count = tx.count(tier.source(), &Filter::period(bounds)).await?;
    let existing = tx
        .count(Table::Summary(tier), &Filter::period(Period::day(bounds.start)))
        .await?;

    Ok(Availability {
        period_type,
        period_bounds: bounds,
        source_row_count,
        summary_already_exists: existing > 0,
    })
}

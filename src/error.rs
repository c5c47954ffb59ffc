use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Tier;

pub type SummaryResult<T> = Result<T, SummaryError>;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("invalid period type '{0}', expected 'weekly' or 'monthly'")]
    InvalidPeriodType(String),

    #[error("invalid conflict policy '{0}', expected 'keep', 'overwrite' or 'reject'")]
    InvalidPolicy(String),

    #[error("invalid tier '{0}', expected 'daily', 'weekly' or 'monthly'")]
    InvalidTier(String),

    #[error("inspection is missing required fields: {}", format_fields(.0))]
    InvalidInspection(BTreeMap<&'static str, &'static str>),

    #[error("{tier} summary already exists for {period_start} ({existing} rows)")]
    ConflictExists {
        tier: Tier,
        period_start: NaiveDate,
        existing: i64,
    },

    #[error("no {tier} summaries found for {period_start}")]
    NoSummaryData { tier: Tier, period_start: NaiveDate },

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl SummaryError {
    /// Client errors are caused by caller input and are never worth retrying.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SummaryError::Persistence(_))
    }
}

fn format_fields(fields: &BTreeMap<&'static str, &'static str>) -> String {
    fields
        .iter()
        .map(|(field, reason)| format!("{field} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SummaryError;
use crate::period::Period;

/// The nine counters carried by every summary tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    HouseholdsVisited,
    CriticalPoints,
    BreedingSitesFound,
    BreedingSitesEliminated,
    LarvaeFound,
    LarvaeCollected,
    AdultsFound,
    AdultsCollected,
    SuspectedCases,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::HouseholdsVisited,
        Metric::CriticalPoints,
        Metric::BreedingSitesFound,
        Metric::BreedingSitesEliminated,
        Metric::LarvaeFound,
        Metric::LarvaeCollected,
        Metric::AdultsFound,
        Metric::AdultsCollected,
        Metric::SuspectedCases,
    ];

    /// Column on `inspections` summed into this metric. Households visited
    /// has none: it is the number of inspection rows.
    pub fn inspection_column(self) -> Option<&'static str> {
        match self {
            Metric::HouseholdsVisited => None,
            Metric::CriticalPoints => Some("critical_points"),
            Metric::BreedingSitesFound => Some("breeding_sites_found"),
            Metric::BreedingSitesEliminated => Some("breeding_sites_eliminated"),
            Metric::LarvaeFound => Some("larvae_found"),
            Metric::LarvaeCollected => Some("larvae_collected"),
            Metric::AdultsFound => Some("adults_found"),
            Metric::AdultsCollected => Some("adults_collected"),
            Metric::SuspectedCases => Some("suspected_cases"),
        }
    }

    pub fn summary_column(self, tier: Tier) -> &'static str {
        match (self, tier) {
            (Metric::HouseholdsVisited, Tier::Monthly) => "households_visited_month",
            (Metric::HouseholdsVisited, _) => "households_visited_total",
            (Metric::CriticalPoints, Tier::Monthly) => "critical_points_month",
            (Metric::CriticalPoints, _) => "critical_points_total",
            (Metric::BreedingSitesFound, Tier::Monthly) => "breeding_sites_found_month",
            (Metric::BreedingSitesFound, _) => "breeding_sites_found_total",
            (Metric::BreedingSitesEliminated, Tier::Monthly) => "breeding_sites_eliminated_month",
            (Metric::BreedingSitesEliminated, _) => "breeding_sites_eliminated_total",
            (Metric::LarvaeFound, Tier::Monthly) => "larvae_found_month",
            (Metric::LarvaeFound, _) => "larvae_found_total",
            (Metric::LarvaeCollected, Tier::Monthly) => "larvae_collected_month",
            (Metric::LarvaeCollected, _) => "larvae_collected_total",
            (Metric::AdultsFound, Tier::Monthly) => "adults_found_month",
            (Metric::AdultsFound, _) => "adults_found_total",
            (Metric::AdultsCollected, Tier::Monthly) => "adults_collected_month",
            (Metric::AdultsCollected, _) => "adults_collected_total",
            (Metric::SuspectedCases, Tier::Monthly) => "suspected_cases_month",
            (Metric::SuspectedCases, _) => "suspected_cases_total",
        }
    }

    /// Alias used for this metric in grouped-sum result sets.
    pub fn alias(self) -> &'static str {
        self.summary_column(Tier::Daily)
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::HouseholdsVisited => "Households visited",
            Metric::CriticalPoints => "Critical points",
            Metric::BreedingSitesFound => "Breeding sites found",
            Metric::BreedingSitesEliminated => "Breeding sites eliminated",
            Metric::LarvaeFound => "Larvae found",
            Metric::LarvaeCollected => "Larvae collected",
            Metric::AdultsFound => "Adults found",
            Metric::AdultsCollected => "Adults collected",
            Metric::SuspectedCases => "Suspected cases",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub households_visited: i64,
    pub critical_points: i64,
    pub breeding_sites_found: i64,
    pub breeding_sites_eliminated: i64,
    pub larvae_found: i64,
    pub larvae_collected: i64,
    pub adults_found: i64,
    pub adults_collected: i64,
    pub suspected_cases: i64,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> i64 {
        match metric {
            Metric::HouseholdsVisited => self.households_visited,
            Metric::CriticalPoints => self.critical_points,
            Metric::BreedingSitesFound => self.breeding_sites_found,
            Metric::BreedingSitesEliminated => self.breeding_sites_eliminated,
            Metric::LarvaeFound => self.larvae_found,
            Metric::LarvaeCollected => self.larvae_collected,
            Metric::AdultsFound => self.adults_found,
            Metric::AdultsCollected => self.adults_collected,
            Metric::SuspectedCases => self.suspected_cases,
        }
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        let slot = match metric {
            Metric::HouseholdsVisited => &mut self.households_visited,
            Metric::CriticalPoints => &mut self.critical_points,
            Metric::BreedingSitesFound => &mut self.breeding_sites_found,
            Metric::BreedingSitesEliminated => &mut self.breeding_sites_eliminated,
            Metric::LarvaeFound => &mut self.larvae_found,
            Metric::LarvaeCollected => &mut self.larvae_collected,
            Metric::AdultsFound => &mut self.adults_found,
            Metric::AdultsCollected => &mut self.adults_collected,
            Metric::SuspectedCases => &mut self.suspected_cases,
        };
        *slot = value;
    }

    pub fn accumulate(&mut self, other: &Metrics) {
        for metric in Metric::ALL {
            self.set(metric, self.get(metric) + other.get(metric));
        }
    }
}

/// A summary tier in the daily -> weekly -> monthly cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub fn table(self) -> &'static str {
        match self {
            Tier::Daily => "daily_summary",
            Tier::Weekly => "weekly_summary",
            Tier::Monthly => "monthly_summary",
        }
    }

    /// Column identifying the period of a row (the period key).
    pub fn key_column(self) -> &'static str {
        match self {
            Tier::Daily => "summary_date",
            Tier::Weekly => "week_start",
            Tier::Monthly => "month_start",
        }
    }

    pub fn end_column(self) -> Option<&'static str> {
        match self {
            Tier::Daily => None,
            Tier::Weekly => Some("week_end"),
            Tier::Monthly => Some("month_end"),
        }
    }

    /// The tier read when regenerating this one.
    pub fn source(self) -> Table {
        match self {
            Tier::Daily => Table::Inspections,
            Tier::Weekly => Table::Summary(Tier::Daily),
            Tier::Monthly => Table::Summary(Tier::Weekly),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Daily => write!(f, "daily"),
            Tier::Weekly => write!(f, "weekly"),
            Tier::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for Tier {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "diario" => Ok(Tier::Daily),
            "weekly" | "semanal" => Ok(Tier::Weekly),
            "monthly" | "mensal" => Ok(Tier::Monthly),
            other => Err(SummaryError::InvalidTier(other.to_string())),
        }
    }
}

/// Any table the aggregation engine can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Inspections,
    Summary(Tier),
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Inspections => "inspections",
            Table::Summary(tier) => tier.table(),
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            Table::Inspections => "visit_date",
            Table::Summary(tier) => tier.key_column(),
        }
    }

    /// SQL expression producing the summed value of `metric` over this table.
    pub fn sum_expression(self, metric: Metric) -> String {
        match self {
            Table::Inspections => match metric.inspection_column() {
                Some(column) => format!("COALESCE(SUM(COALESCE({column}, 0)), 0)::BIGINT"),
                None => "COUNT(*)::BIGINT".to_string(),
            },
            Table::Summary(tier) => format!(
                "COALESCE(SUM(COALESCE({}, 0)), 0)::BIGINT",
                metric.summary_column(tier)
            ),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row selection shared by every data-access operation: rows whose period key
/// falls within `period` (inclusive), optionally for a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub period: Period,
    pub agent_id: Option<i32>,
}

impl Filter {
    pub fn period(period: Period) -> Self {
        Self {
            period,
            agent_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentTotals {
    pub agent_id: i32,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub tier: Tier,
    pub period: Period,
    pub agent_id: i32,
    pub metrics: Metrics,
}

/// A household visit as submitted by a field agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewInspection {
    pub source_key: Option<String>,
    pub visit_date: Option<NaiveDate>,
    pub agent_id: Option<i32>,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub insect_type: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub critical_points: Option<i32>,
    pub breeding_sites_found: Option<i32>,
    pub breeding_sites_eliminated: Option<i32>,
    pub breeding_site_types: Option<String>,
    pub larvae_found: Option<i32>,
    pub larvae_collected: Option<i32>,
    pub adults_found: Option<i32>,
    pub adults_collected: Option<i32>,
    pub suspected_cases: Option<i32>,
    pub action_taken: Option<String>,
    pub insecticide_used: Option<String>,
    pub insecticide_amount: Option<String>,
    pub resident_name: Option<String>,
    pub resident_phone: Option<String>,
    pub notes: Option<String>,
    pub geolocation: Option<String>,
}

/// A validated inspection ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionRecord {
    pub source_key: String,
    pub visit_date: NaiveDate,
    pub agent_id: i32,
    pub neighborhood: String,
    pub address: String,
    pub insect_type: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub critical_points: Option<i32>,
    pub breeding_sites_found: Option<i32>,
    pub breeding_sites_eliminated: Option<i32>,
    pub breeding_site_types: Option<String>,
    pub larvae_found: Option<i32>,
    pub larvae_collected: Option<i32>,
    pub adults_found: Option<i32>,
    pub adults_collected: Option<i32>,
    pub suspected_cases: Option<i32>,
    pub action_taken: Option<String>,
    pub insecticide_used: Option<String>,
    pub insecticide_amount: Option<String>,
    pub resident_name: Option<String>,
    pub resident_phone: Option<String>,
    pub notes: Option<String>,
    pub geolocation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_columns_use_month_suffix() {
        for metric in Metric::ALL {
            assert!(metric.summary_column(Tier::Monthly).ends_with("_month"));
            assert!(metric.summary_column(Tier::Weekly).ends_with("_total"));
            assert_eq!(
                metric.summary_column(Tier::Daily),
                metric.summary_column(Tier::Weekly)
            );
        }
    }

    #[test]
    fn inspection_sums_coalesce_nulls() {
        assert_eq!(
            Table::Inspections.sum_expression(Metric::CriticalPoints),
            "COALESCE(SUM(COALESCE(critical_points, 0)), 0)::BIGINT"
        );
        assert_eq!(
            Table::Inspections.sum_expression(Metric::HouseholdsVisited),
            "COUNT(*)::BIGINT"
        );
    }

    #[test]
    fn tiers_parse_english_and_portuguese_names() {
        assert_eq!("weekly".parse::<Tier>().unwrap(), Tier::Weekly);
        assert_eq!("Mensal".parse::<Tier>().unwrap(), Tier::Monthly);
        assert!(matches!(
            "yearly".parse::<Tier>(),
            Err(SummaryError::InvalidTier(_))
        ));
    }

    #[test]
    fn accumulate_adds_every_metric() {
        let mut total = Metrics {
            households_visited: 5,
            suspected_cases: 1,
            ..Metrics::default()
        };
        total.accumulate(&Metrics {
            households_visited: 3,
            larvae_found: 4,
            ..Metrics::default()
        });
        assert_eq!(total.households_visited, 8);
        assert_eq!(total.larvae_found, 4);
        assert_eq!(total.suspected_cases, 1);
    }
}

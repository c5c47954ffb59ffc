use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::availability::{check_availability, Availability, PeriodType};
use crate::error::{SummaryError, SummaryResult};
use crate::models::{Filter, Metric, Metrics, SummaryRow, Tier};
use crate::period::{self, Period};
use crate::store::{StoreTx, SummaryStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub name: String,
    pub labels: Vec<String>,
    pub values: Vec<i64>,
}

/// Chart-ready datasets for one period of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartData {
    pub tier: Tier,
    pub period: Period,
    pub totals: Metrics,
    pub agent_comparison: Vec<Series>,
    pub breeding_sites: Vec<Series>,
    pub larvae: Vec<Series>,
    pub adults: Vec<Series>,
    pub rows: Vec<SummaryRow>,
}

pub fn period_for(tier: Tier, reference: NaiveDate) -> Period {
    match tier {
        Tier::Daily => Period::day(reference),
        Tier::Weekly => period::week_bounds(reference),
        Tier::Monthly => period::month_bounds(reference),
    }
}

pub async fn list_summaries<S: SummaryStore>(
    store: &S,
    tier: Tier,
    limit: Option<i64>,
) -> SummaryResult<Vec<SummaryRow>> {
    let mut tx = store.begin().await?;
    let rows = tx.fetch_summaries(tier, None, limit).await?;
    Ok(rows)
}

async fn rows_for<S: SummaryStore>(
    store: &S,
    tier: Tier,
    period: Period,
) -> SummaryResult<Vec<SummaryRow>> {
    let mut tx = store.begin().await?;
    let mut rows = tx
        .fetch_summaries(tier, Some(&Filter::period(Period::day(period.start))), None)
        .await?;
    rows.sort_by_key(|row| row.agent_id);
    Ok(rows)
}

pub async fn chart_data<S: SummaryStore>(
    store: &S,
    tier: Tier,
    reference: NaiveDate,
) -> SummaryResult<ChartData> {
    let period = period_for(tier, reference);
    let rows = rows_for(store, tier, period).await?;
    if rows.is_empty() {
        return Err(SummaryError::NoSummaryData {
            tier,
            period_start: period.start,
        });
    }
    Ok(build_chart(tier, period, rows))
}

fn agent_label(agent_id: i32) -> String {
    format!("Agent {agent_id}")
}

/// One series per metric, one point per agent.
fn per_metric(rows: &[SummaryRow], metrics: &[Metric]) -> Vec<Series> {
    let labels: Vec<String> = rows.iter().map(|row| agent_label(row.agent_id)).collect();
    metrics
        .iter()
        .map(|metric| Series {
            name: metric.label().to_string(),
            labels: labels.clone(),
            values: rows.iter().map(|row| row.metrics.get(*metric)).collect(),
        })
        .collect()
}

/// One series per agent comparing two related metrics.
fn per_agent(rows: &[SummaryRow], pair: [(Metric, &str); 2]) -> Vec<Series> {
    rows.iter()
        .map(|row| Series {
            name: agent_label(row.agent_id),
            labels: pair.iter().map(|(_, label)| label.to_string()).collect(),
            values: pair.iter().map(|(metric, _)| row.metrics.get(*metric)).collect(),
        })
        .collect()
}

pub fn build_chart(tier: Tier, period: Period, rows: Vec<SummaryRow>) -> ChartData {
    let mut totals = Metrics::default();
    for row in &rows {
        totals.accumulate(&row.metrics);
    }

    ChartData {
        tier,
        period,
        totals,
        agent_comparison: per_metric(
            &rows,
            &[
                Metric::HouseholdsVisited,
                Metric::CriticalPoints,
                Metric::SuspectedCases,
            ],
        ),
        breeding_sites: per_agent(
            &rows,
            [
                (Metric::BreedingSitesFound, "Found"),
                (Metric::BreedingSitesEliminated, "Eliminated"),
            ],
        ),
        larvae: per_metric(&rows, &[Metric::LarvaeFound, Metric::LarvaeCollected]),
        adults: per_metric(&rows, &[Metric::AdultsFound, Metric::AdultsCollected]),
        rows,
    }
}

pub async fn period_report<S: SummaryStore>(
    store: &S,
    reference: NaiveDate,
) -> SummaryResult<String> {
    let weekly = check_availability(store, PeriodType::Weekly, reference).await?;
    let monthly = check_availability(store, PeriodType::Monthly, reference).await?;
    let weekly_rows = rows_for(store, Tier::Weekly, weekly.period_bounds).await?;
    let monthly_rows = rows_for(store, Tier::Monthly, monthly.period_bounds).await?;
    Ok(build_report(
        reference,
        &[(&weekly, &weekly_rows[..]), (&monthly, &monthly_rows[..])],
    ))
}

pub fn build_report(reference: NaiveDate, sections: &[(&Availability, &[SummaryRow])]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Vector Control Field Summary");
    let _ = writeln!(output, "Generated for reference date {reference}");

    for (availability, rows) in sections {
        let bounds = availability.period_bounds;
        let title = match availability.period_type {
            PeriodType::Weekly => "Week",
            PeriodType::Monthly => "Month",
        };

        let _ = writeln!(output);
        let _ = writeln!(output, "## {title} {} to {}", bounds.start, bounds.end);
        let _ = writeln!(
            output,
            "- Source rows available: {}",
            availability.source_row_count
        );
        let _ = writeln!(
            output,
            "- Ready to regenerate: {}",
            if availability.available() { "yes" } else { "no" }
        );
        let _ = writeln!(
            output,
            "- Summary stored: {}",
            if availability.summary_already_exists {
                "yes"
            } else {
                "no"
            }
        );

        if rows.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "No summaries generated for this period.");
            continue;
        }

        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "| Agent | Visits | Critical points | Sites found | Sites eliminated | Larvae found | Larvae collected | Adults found | Adults collected | Suspected cases |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|---|");
        let mut totals = Metrics::default();
        for row in rows.iter() {
            totals.accumulate(&row.metrics);
            let _ = writeln!(output, "{}", table_line(&row.agent_id.to_string(), &row.metrics));
        }
        let _ = writeln!(output, "{}", table_line("**Total**", &totals));
    }

    output
}

/// One markdown row with every metric, in `Metric::ALL` order.
fn table_line(label: &str, metrics: &Metrics) -> String {
    let cells = Metric::ALL
        .iter()
        .map(|metric| metrics.get(*metric).to_string())
        .collect::<Vec<_>>()
        .join(" | ");
    format!("| {label} | {cells} |")
}

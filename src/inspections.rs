use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{aggregate_in, AggregationJob, AggregationReport, ConflictPolicy};
use crate::error::{SummaryError, SummaryResult};
use crate::models::{InspectionRecord, NewInspection, Tier};
use crate::period::Period;
use crate::store::{StoreTx, SummaryStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    /// `None` when the source key had already been imported.
    pub inspection_id: Option<i64>,
    pub daily: Option<AggregationReport>,
    pub timestamps_captured: bool,
}

pub fn validate(input: NewInspection) -> SummaryResult<InspectionRecord> {
    let mut missing = BTreeMap::new();
    if input.visit_date.is_none() {
        missing.insert("visit_date", "required");
    }
    if input.agent_id.is_none() {
        missing.insert("agent_id", "required");
    }
    for (field, value) in [
        ("neighborhood", &input.neighborhood),
        ("address", &input.address),
        ("insect_type", &input.insect_type),
    ] {
        if value.trim().is_empty() {
            missing.insert(field, "required");
        }
    }

    let (Some(visit_date), Some(agent_id)) = (input.visit_date, input.agent_id) else {
        return Err(SummaryError::InvalidInspection(missing));
    };
    if !missing.is_empty() {
        return Err(SummaryError::InvalidInspection(missing));
    }

    let start_time = input.started_at.map(|ts| minute_of(ts.time())).or(input.start_time);
    let end_time = input.finished_at.map(|ts| minute_of(ts.time())).or(input.end_time);

    Ok(InspectionRecord {
        source_key: input
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("form-{}", Uuid::new_v4())),
        visit_date,
        agent_id,
        neighborhood: input.neighborhood.trim().to_string(),
        address: input.address.trim().to_string(),
        insect_type: input.insect_type.trim().to_string(),
        start_time,
        end_time,
        started_at: input.started_at,
        finished_at: input.finished_at,
        critical_points: input.critical_points,
        breeding_sites_found: input.breeding_sites_found,
        breeding_sites_eliminated: input.breeding_sites_eliminated,
        breeding_site_types: input.breeding_site_types,
        larvae_found: input.larvae_found,
        larvae_collected: input.larvae_collected,
        adults_found: input.adults_found,
        adults_collected: input.adults_collected,
        suspected_cases: input.suspected_cases,
        action_taken: input.action_taken,
        insecticide_used: input.insecticide_used,
        insecticide_amount: input.insecticide_amount,
        resident_name: input.resident_name,
        resident_phone: input.resident_phone,
        notes: input.notes,
        geolocation: input.geolocation,
    })
}

/// Truncates to HH:MM, the precision agents record visits at.
fn minute_of(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Stores one inspection and rebuilds its agent's daily summary for that date,
/// both in the same transaction.
pub async fn submit_inspection<S: SummaryStore>(
    store: &S,
    input: NewInspection,
) -> SummaryResult<SubmitReceipt> {
    let record = validate(input)?;
    let timestamps_captured = record.started_at.is_some() && record.finished_at.is_some();

    let mut tx = store.begin().await?;
    let Some(id) = tx.insert_inspection(&record).await? else {
        debug!(source_key = %record.source_key, "inspection already stored");
        return Ok(SubmitReceipt {
            inspection_id: None,
            daily: None,
            timestamps_captured,
        });
    };

    let job = AggregationJob::new(Tier::Daily, Period::day(record.visit_date))
        .for_agent(record.agent_id);
    let daily = aggregate_in(&mut tx, job, ConflictPolicy::Overwrite).await?;
    tx.commit().await?;

    info!(
        inspection_id = id,
        agent_id = record.agent_id,
        date = %record.visit_date,
        "inspection stored, daily summary refreshed"
    );
    Ok(SubmitReceipt {
        inspection_id: Some(id),
        daily: Some(daily),
        timestamps_captured,
    })
}

pub async fn import_csv<S: SummaryStore>(store: &S, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<NewInspection>().enumerate() {
        let mut row = result.with_context(|| format!("invalid CSV row {}", index + 1))?;
        if row.source_key.is_none() {
            row.source_key = Some(format!("import-{}", Uuid::new_v4()));
        }

        let receipt = submit_inspection(store, row)
            .await
            .with_context(|| format!("failed to import CSV row {}", index + 1))?;
        if receipt.inspection_id.is_some() {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn seed<S: SummaryStore>(store: &S) -> anyhow::Result<usize> {
    let visits = [
        ("seed-001", (2024, 3, 4), 7, "Centro", "Rua das Flores, 12", Some(2), Some(3), Some(0)),
        ("seed-002", (2024, 3, 4), 7, "Centro", "Rua das Flores, 40", Some(1), Some(1), Some(0)),
        ("seed-003", (2024, 3, 4), 7, "Centro", "Travessa Sol, 8", Some(3), Some(2), Some(1)),
        ("seed-004", (2024, 3, 5), 8, "Jardim América", "Av. Brasil, 1020", Some(0), None, Some(0)),
        ("seed-005", (2024, 3, 6), 8, "Jardim América", "Rua Goiás, 77", Some(4), Some(5), Some(2)),
        ("seed-006", (2024, 3, 12), 9, "Vila Nova", "Rua Pará, 3", None, Some(1), Some(0)),
    ];

    let mut inserted = 0usize;
    for (source_key, (year, month, day), agent_id, neighborhood, address, critical, sites, cases) in
        visits
    {
        let visit = NewInspection {
            source_key: Some(source_key.to_string()),
            visit_date: Some(NaiveDate::from_ymd_opt(year, month, day).context("invalid date")?),
            agent_id: Some(agent_id),
            neighborhood: neighborhood.to_string(),
            address: address.to_string(),
            insect_type: "Aedes aegypti".to_string(),
            critical_points: critical,
            breeding_sites_found: sites,
            breeding_sites_eliminated: sites,
            larvae_found: sites.map(|count| count * 4),
            larvae_collected: sites.map(|count| count * 2),
            suspected_cases: cases,
            ..NewInspection::default()
        };
        if submit_inspection(store, visit).await?.inspection_id.is_some() {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::aggregate::Outcome;
    use crate::cascade::{regenerate_daily, regenerate_weekly};
    use crate::store::memory::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn visit(agent_id: i32, day: NaiveDate, critical_points: Option<i32>) -> NewInspection {
        NewInspection {
            visit_date: Some(day),
            agent_id: Some(agent_id),
            neighborhood: "Centro".to_string(),
            address: "Rua A, 10".to_string(),
            insect_type: "Aedes aegypti".to_string(),
            critical_points,
            ..NewInspection::default()
        }
    }

    #[test]
    fn validation_reports_all_missing_fields() {
        let err = validate(NewInspection {
            agent_id: Some(3),
            address: "  ".to_string(),
            ..NewInspection::default()
        })
        .unwrap_err();
        match err {
            SummaryError::InvalidInspection(fields) => {
                let names: Vec<_> = fields.keys().copied().collect();
                assert_eq!(names, ["address", "insect_type", "neighborhood", "visit_date"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timestamps_take_precedence_over_times() {
        let mut input = visit(1, date(2024, 3, 4), None);
        input.start_time = NaiveTime::from_hms_opt(7, 0, 0);
        input.started_at = Some(Utc.with_ymd_and_hms(2024, 3, 4, 8, 15, 42).unwrap());
        input.end_time = NaiveTime::from_hms_opt(9, 30, 0);

        let record = validate(input).unwrap();
        assert_eq!(record.start_time, NaiveTime::from_hms_opt(8, 15, 0));
        assert_eq!(record.end_time, NaiveTime::from_hms_opt(9, 30, 0));
        assert!(record.source_key.starts_with("form-"));
    }

    #[tokio::test]
    async fn submissions_roll_up_to_daily_then_weekly() {
        let store = MemoryStore::new();
        for points in [2, 1, 3] {
            let receipt = submit_inspection(&store, visit(7, date(2024, 3, 4), Some(points)))
                .await
                .unwrap();
            assert!(receipt.inspection_id.is_some());
        }
        submit_inspection(&store, visit(7, date(2024, 3, 4), None))
            .await
            .unwrap();

        let daily = store.summaries(Tier::Daily);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].agent_id, 7);
        assert_eq!(daily[0].metrics.critical_points, 6);
        assert_eq!(daily[0].metrics.households_visited, 4);

        let report = regenerate_weekly(&store, date(2024, 3, 5), ConflictPolicy::Keep)
            .await
            .unwrap();
        assert_eq!(report.period.start, date(2024, 3, 4));
        let weekly = store.summaries(Tier::Weekly);
        assert_eq!(weekly[0].period.start, date(2024, 3, 4));
        assert_eq!(weekly[0].metrics.critical_points, 6);
    }

    #[tokio::test]
    async fn daily_refresh_is_scoped_to_agent() {
        let store = MemoryStore::new();
        submit_inspection(&store, visit(1, date(2024, 3, 4), Some(2)))
            .await
            .unwrap();
        let receipt = submit_inspection(&store, visit(2, date(2024, 3, 4), Some(5)))
            .await
            .unwrap();
        let daily = receipt.daily.unwrap();
        assert_eq!(daily.source_rows_found, 1);
        assert_eq!(daily.outcome, Outcome::Written { replaced: 0 });

        let rows = store.summaries(Tier::Daily);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metrics.critical_points, 2);
        assert_eq!(rows[1].metrics.critical_points, 5);
    }

    #[tokio::test]
    async fn failed_daily_refresh_discards_inspection() {
        let store = MemoryStore::new();
        store.fail_inserts(true);
        let err = submit_inspection(&store, visit(1, date(2024, 3, 4), Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::Persistence(_)));

        store.fail_inserts(false);
        let report = regenerate_daily(&store, date(2024, 3, 4), ConflictPolicy::Keep)
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::NoSourceData);
    }

    #[tokio::test]
    async fn reimporting_csv_is_idempotent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "source_key,visit_date,agent_id,neighborhood,address,insect_type,critical_points,suspected_cases"
        )
        .unwrap();
        writeln!(file, "row-1,2024-03-04,7,Centro,Rua A,Aedes aegypti,2,").unwrap();
        writeln!(file, "row-2,2024-03-04,7,Centro,Rua B,Aedes aegypti,,1").unwrap();
        file.flush().unwrap();

        let store = MemoryStore::new();
        assert_eq!(import_csv(&store, file.path()).await.unwrap(), 2);
        assert_eq!(import_csv(&store, file.path()).await.unwrap(), 0);

        let daily = store.summaries(Tier::Daily);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].metrics.households_visited, 2);
        assert_eq!(daily[0].metrics.critical_points, 2);
        assert_eq!(daily[0].metrics.suspected_cases, 1);
    }

    #[tokio::test]
    async fn seed_populates_three_agents() {
        let store = MemoryStore::new();
        assert_eq!(seed(&store).await.unwrap(), 6);
        assert_eq!(seed(&store).await.unwrap(), 0);

        let daily = store.summaries(Tier::Daily);
        let agents: Vec<i32> = daily.iter().map(|row| row.agent_id).collect();
        assert_eq!(agents, [7, 8, 8, 9]);
        assert_eq!(daily[0].metrics.critical_points, 6);
    }
}

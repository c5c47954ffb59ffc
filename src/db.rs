use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::SummaryResult;
use crate::models::{AgentTotals, Filter, InspectionRecord, Metric, Metrics, SummaryRow, Table, Tier};
use crate::period::Period;
use crate::store::{StoreTx, SummaryStore};

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl SummaryStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> SummaryResult<PgTx> {
        Ok(PgTx {
            tx: self.pool.begin().await?,
        })
    }
}

fn where_clause(key_column: &str, filter: &Filter) -> String {
    let mut clause = format!("{key_column} BETWEEN $1 AND $2");
    if filter.agent_id.is_some() {
        clause.push_str(" AND agent_id = $3");
    }
    clause
}

fn metric_list(tier: Tier) -> String {
    Metric::ALL
        .iter()
        .map(|metric| metric.summary_column(tier))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_metrics(row: &PgRow, column: impl Fn(Metric) -> &'static str) -> SummaryResult<Metrics> {
    let mut metrics = Metrics::default();
    for metric in Metric::ALL {
        metrics.set(metric, row.try_get::<i64, _>(column(metric))?);
    }
    Ok(metrics)
}

impl StoreTx for PgTx {
    async fn count(&mut self, table: Table, filter: &Filter) -> SummaryResult<i64> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            table.name(),
            where_clause(table.key_column(), filter)
        );
        let mut count = sqlx::query_scalar::<_, i64>(&query)
            .bind(filter.period.start)
            .bind(filter.period.end);
        if let Some(agent_id) = filter.agent_id {
            count = count.bind(agent_id);
        }
        let total = count.fetch_one(&mut *self.tx).await?;
        Ok(total)
    }

    async fn grouped_sums(
        &mut self,
        table: Table,
        filter: &Filter,
    ) -> SummaryResult<Vec<AgentTotals>> {
        let sums = Metric::ALL
            .iter()
            .map(|metric| format!("{} AS {}", table.sum_expression(*metric), metric.alias()))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT agent_id, {sums} FROM {} WHERE {} GROUP BY agent_id ORDER BY agent_id",
            table.name(),
            where_clause(table.key_column(), filter)
        );

        let mut rows = sqlx::query(&query)
            .bind(filter.period.start)
            .bind(filter.period.end);
        if let Some(agent_id) = filter.agent_id {
            rows = rows.bind(agent_id);
        }

        let records = rows.fetch_all(&mut *self.tx).await?;
        let mut totals = Vec::with_capacity(records.len());
        for row in records {
            totals.push(AgentTotals {
                agent_id: row.try_get("agent_id")?,
                metrics: read_metrics(&row, Metric::alias)?,
            });
        }
        Ok(totals)
    }

    async fn delete(&mut self, tier: Tier, filter: &Filter) -> SummaryResult<u64> {
        let query = format!(
            "DELETE FROM {} WHERE {}",
            tier.table(),
            where_clause(tier.key_column(), filter)
        );
        let mut delete = sqlx::query(&query)
            .bind(filter.period.start)
            .bind(filter.period.end);
        if let Some(agent_id) = filter.agent_id {
            delete = delete.bind(agent_id);
        }
        let result = delete.execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn insert_rows(
        &mut self,
        tier: Tier,
        period: Period,
        rows: &[AgentTotals],
    ) -> SummaryResult<u64> {
        let mut columns = vec![tier.key_column()];
        columns.extend(tier.end_column());
        columns.push("agent_id");
        columns.extend(Metric::ALL.iter().map(|metric| metric.summary_column(tier)));
        let placeholders = (1..=columns.len())
            .map(|index| format!("${index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            tier.table(),
            columns.join(", ")
        );

        let mut inserted = 0u64;
        for row in rows {
            let mut insert = sqlx::query(&query).bind(period.start);
            if tier.end_column().is_some() {
                insert = insert.bind(period.end);
            }
            insert = insert.bind(row.agent_id);
            for metric in Metric::ALL {
                insert = insert.bind(row.metrics.get(metric));
            }
            inserted += insert.execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_inspection(&mut self, record: &InspectionRecord) -> SummaryResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO inspections (
                source_key, visit_date, agent_id, neighborhood, address, insect_type,
                start_time, end_time, critical_points, breeding_sites_found,
                breeding_sites_eliminated, breeding_site_types, larvae_found, larvae_collected,
                adults_found, adults_collected, suspected_cases, action_taken, insecticide_used,
                insecticide_amount, resident_name, resident_phone, notes,
                started_at, finished_at, geolocation
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            ON CONFLICT (source_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&record.source_key)
        .bind(record.visit_date)
        .bind(record.agent_id)
        .bind(&record.neighborhood)
        .bind(&record.address)
        .bind(&record.insect_type)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.critical_points)
        .bind(record.breeding_sites_found)
        .bind(record.breeding_sites_eliminated)
        .bind(&record.breeding_site_types)
        .bind(record.larvae_found)
        .bind(record.larvae_collected)
        .bind(record.adults_found)
        .bind(record.adults_collected)
        .bind(record.suspected_cases)
        .bind(&record.action_taken)
        .bind(&record.insecticide_used)
        .bind(&record.insecticide_amount)
        .bind(&record.resident_name)
        .bind(&record.resident_phone)
        .bind(&record.notes)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(&record.geolocation)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn fetch_summaries(
        &mut self,
        tier: Tier,
        filter: Option<&Filter>,
        limit: Option<i64>,
    ) -> SummaryResult<Vec<SummaryRow>> {
        let end_column = tier.end_column().unwrap_or(tier.key_column());
        let mut query = format!(
            "SELECT {key} AS period_start, {end_column} AS period_end, agent_id, {} FROM {}",
            metric_list(tier),
            tier.table(),
            key = tier.key_column(),
        );
        if let Some(filter) = filter {
            query.push_str(" WHERE ");
            query.push_str(&where_clause(tier.key_column(), filter));
        }
        query.push_str(&format!(" ORDER BY {} DESC, agent_id", tier.key_column()));
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut rows = sqlx::query(&query);
        if let Some(filter) = filter {
            rows = rows.bind(filter.period.start).bind(filter.period.end);
            if let Some(agent_id) = filter.agent_id {
                rows = rows.bind(agent_id);
            }
        }

        let records = rows.fetch_all(&mut *self.tx).await?;
        let mut summaries = Vec::with_capacity(records.len());
        for row in records {
            summaries.push(SummaryRow {
                tier,
                period: Period {
                    start: row.try_get::<NaiveDate, _>("period_start")?,
                    end: row.try_get::<NaiveDate, _>("period_end")?,
                },
                agent_id: row.try_get("agent_id")?,
                metrics: read_metrics(&row, |metric| metric.summary_column(tier))?,
            });
        }
        Ok(summaries)
    }

    async fn commit(self) -> SummaryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

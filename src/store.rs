//! Data-access seam used by the aggregation pipeline.
//!
//! Every operation runs inside a [`StoreTx`]. Dropping a transaction without
//! calling [`StoreTx::commit`] rolls it back, so an early return or `?` never
//! leaves a half-applied delete-then-insert behind.

use crate::error::SummaryResult;
use crate::models::{AgentTotals, Filter, InspectionRecord, SummaryRow, Table, Tier};
use crate::period::Period;

#[allow(async_fn_in_trait)]
pub trait SummaryStore {
    type Tx: StoreTx;

    async fn begin(&self) -> SummaryResult<Self::Tx>;
}

#[allow(async_fn_in_trait)]
pub trait StoreTx {
    async fn count(&mut self, table: Table, filter: &Filter) -> SummaryResult<i64>;

    /// Per-agent sums of every metric over the filtered rows, ordered by agent.
    async fn grouped_sums(&mut self, table: Table, filter: &Filter)
        -> SummaryResult<Vec<AgentTotals>>;

    async fn delete(&mut self, tier: Tier, filter: &Filter) -> SummaryResult<u64>;

    async fn insert_rows(
        &mut self,
        tier: Tier,
        period: Period,
        rows: &[AgentTotals],
    ) -> SummaryResult<u64>;

    /// Returns `None` when a record with the same source key is already stored.
    async fn insert_inspection(&mut self, record: &InspectionRecord) -> SummaryResult<Option<i64>>;

    /// Newest periods first, then by agent.
    async fn fetch_summaries(
        &mut self,
        tier: Tier,
        filter: Option<&Filter>,
        limit: Option<i64>,
    ) -> SummaryResult<Vec<SummaryRow>>;

    async fn commit(self) -> SummaryResult<()>
    where
        Self: Sized;
}

#[cfg(test)]
pub mod memory {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::{Metric, Metrics};

    fn in_filter(filter: &Filter, date: chrono::NaiveDate, agent_id: i32) -> bool {
        filter.period.contains(date) && filter.agent_id.map_or(true, |id| id == agent_id)
    }

    /// Mirrors the SQL roll-up: one household per record, missing counts as zero.
    fn inspection_metrics(record: &InspectionRecord) -> Metrics {
        let counts = [
            (Metric::CriticalPoints, record.critical_points),
            (Metric::BreedingSitesFound, record.breeding_sites_found),
            (Metric::BreedingSitesEliminated, record.breeding_sites_eliminated),
            (Metric::LarvaeFound, record.larvae_found),
            (Metric::LarvaeCollected, record.larvae_collected),
            (Metric::AdultsFound, record.adults_found),
            (Metric::AdultsCollected, record.adults_collected),
            (Metric::SuspectedCases, record.suspected_cases),
        ];
        let mut metrics = Metrics {
            households_visited: 1,
            ..Metrics::default()
        };
        for (metric, value) in counts {
            metrics.set(metric, value.map(i64::from).unwrap_or(0));
        }
        metrics
    }

    #[derive(Debug, Clone, Default)]
    struct Tables {
        next_id: i64,
        inspections: Vec<(i64, InspectionRecord)>,
        summaries: Vec<SummaryRow>,
    }

    /// Store backed by process memory, with copy-on-begin transactions.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryStore {
        state: Arc<Mutex<Tables>>,
        fail_inserts: Arc<AtomicBool>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every subsequent `insert_rows` fail, as a lost connection would.
        pub fn fail_inserts(&self, fail: bool) {
            self.fail_inserts.store(fail, Ordering::SeqCst);
        }

        pub fn summaries(&self, tier: Tier) -> Vec<SummaryRow> {
            let state = self.state.lock().expect("memory store poisoned");
            let mut rows: Vec<SummaryRow> = state
                .summaries
                .iter()
                .filter(|row| row.tier == tier)
                .cloned()
                .collect();
            rows.sort_by_key(|row| (row.period.start, row.agent_id));
            rows
        }

        pub fn put_summary(&self, tier: Tier, period: Period, agent_id: i32, metrics: Metrics) {
            let mut state = self.state.lock().expect("memory store poisoned");
            state.summaries.push(SummaryRow {
                tier,
                period,
                agent_id,
                metrics,
            });
        }
    }

    pub struct MemoryTx {
        state: Arc<Mutex<Tables>>,
        staged: Tables,
        fail_inserts: bool,
    }

    impl SummaryStore for MemoryStore {
        type Tx = MemoryTx;

        async fn begin(&self) -> SummaryResult<MemoryTx> {
            let staged = self.state.lock().expect("memory store poisoned").clone();
            Ok(MemoryTx {
                state: Arc::clone(&self.state),
                staged,
                fail_inserts: self.fail_inserts.load(Ordering::SeqCst),
            })
        }
    }

    impl MemoryTx {
        fn source_rows(&self, table: Table, filter: &Filter) -> Vec<(i32, Metrics)> {
            match table {
                Table::Inspections => self
                    .staged
                    .inspections
                    .iter()
                    .filter(|(_, record)| in_filter(filter, record.visit_date, record.agent_id))
                    .map(|(_, record)| (record.agent_id, inspection_metrics(record)))
                    .collect(),
                Table::Summary(tier) => self
                    .staged
                    .summaries
                    .iter()
                    .filter(|row| row.tier == tier && in_filter(filter, row.period.start, row.agent_id))
                    .map(|row| (row.agent_id, row.metrics))
                    .collect(),
            }
        }
    }

    impl StoreTx for MemoryTx {
        async fn count(&mut self, table: Table, filter: &Filter) -> SummaryResult<i64> {
            Ok(self.source_rows(table, filter).len() as i64)
        }

        async fn grouped_sums(
            &mut self,
            table: Table,
            filter: &Filter,
        ) -> SummaryResult<Vec<AgentTotals>> {
            let mut groups: BTreeMap<i32, Metrics> = BTreeMap::new();
            for (agent_id, metrics) in self.source_rows(table, filter) {
                groups.entry(agent_id).or_default().accumulate(&metrics);
            }
            Ok(groups
                .into_iter()
                .map(|(agent_id, metrics)| AgentTotals { agent_id, metrics })
                .collect())
        }

        async fn delete(&mut self, tier: Tier, filter: &Filter) -> SummaryResult<u64> {
            let before = self.staged.summaries.len();
            self.staged
                .summaries
                .retain(|row| !(row.tier == tier && in_filter(filter, row.period.start, row.agent_id)));
            Ok((before - self.staged.summaries.len()) as u64)
        }

        async fn insert_rows(
            &mut self,
            tier: Tier,
            period: Period,
            rows: &[AgentTotals],
        ) -> SummaryResult<u64> {
            if self.fail_inserts {
                return Err(sqlx::Error::Protocol("connection reset during insert".into()).into());
            }
            for row in rows {
                let duplicate = self.staged.summaries.iter().any(|existing| {
                    existing.tier == tier
                        && existing.period.start == period.start
                        && existing.agent_id == row.agent_id
                });
                if duplicate {
                    return Err(sqlx::Error::Protocol(format!(
                        "duplicate key value violates unique constraint on {} ({}, {})",
                        tier.table(),
                        period.start,
                        row.agent_id
                    ))
                    .into());
                }
                self.staged.summaries.push(SummaryRow {
                    tier,
                    period,
                    agent_id: row.agent_id,
                    metrics: row.metrics,
                });
            }
            Ok(rows.len() as u64)
        }

        async fn insert_inspection(
            &mut self,
            record: &InspectionRecord,
        ) -> SummaryResult<Option<i64>> {
            let exists = self
                .staged
                .inspections
                .iter()
                .any(|(_, stored)| stored.source_key == record.source_key);
            if exists {
                return Ok(None);
            }
            self.staged.next_id += 1;
            let id = self.staged.next_id;
            self.staged.inspections.push((id, record.clone()));
            Ok(Some(id))
        }

        async fn fetch_summaries(
            &mut self,
            tier: Tier,
            filter: Option<&Filter>,
            limit: Option<i64>,
        ) -> SummaryResult<Vec<SummaryRow>> {
            let mut rows: Vec<SummaryRow> = self
                .staged
                .summaries
                .iter()
                .filter(|row| row.tier == tier)
                .filter(|row| filter.map_or(true, |f| in_filter(f, row.period.start, row.agent_id)))
                .cloned()
                .collect();
            rows.sort_by(|a, b| {
                b.period
                    .start
                    .cmp(&a.period.start)
                    .then(a.agent_id.cmp(&b.agent_id))
            });
            if let Some(limit) = limit {
                rows.truncate(limit.max(0) as usize);
            }
            Ok(rows)
        }

        async fn commit(self) -> SummaryResult<()> {
            *self.state.lock().expect("memory store poisoned") = self.staged;
            Ok(())
        }
    }
}

//! Purpose: Drive rows of one partition through parse, reconcile, materialize and sink.
//! Exports: `PartitionWorker`, `PartitionStats`, `run_partitions`, `split_partitions`.
//! Role: The only place that touches a sink; owns per-row ordering and skip accounting.
//! Invariants: Rows are processed strictly in order; the sink is flushed after each written
//!             row and closed exactly once.
//! Invariants: A row's records are fully materialized before anything is written for it;
//!             its deletes reach the sink before its records.
//! Invariants: Per-row anomalies are counted and skipped; I/O and sink errors are fatal.
//! Invariants: An unrecognized column or malformed group is warned about and counted once
//!             per row, however many reads saw it.
//! Invariants: A row skipped after reconciliation still writes its deletes.
use std::collections::{BTreeMap, BTreeSet};
use std::thread;

use bstr::ByteSlice;
use bytes::Bytes;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::core::cell::{Cell, ChangeRow, ColumnKey};
use crate::core::config::JobConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::materialize::{FieldSet, RowMaterializer};
use crate::core::outcome::{Outcome, SkipReason};
use crate::core::plan::JobPlan;
use crate::core::predicate::Stage;
use crate::core::reconcile::{Deletion, MutationReconciler, SupplementalRead};
use crate::core::record::{Field, Record};
use crate::core::schema::{SKIP_COMPONENT, unrecognized_column};
use crate::core::sink::{DeleteRow, DeleteScope, SinkAdapter};
use crate::core::source::{ChangeSource, TimeWindow};
use crate::core::value::FieldType;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PartitionStats {
    pub rows_seen: u64,
    pub records_written: u64,
    pub whole_key_deletes: u64,
    pub group_deletes: u64,
    pub skipped: BTreeMap<SkipReason, u64>,
    pub unrecognized_columns: u64,
    pub malformed_groups: u64,
    pub backfills: u64,
    pub rescans: u64,
}

impl PartitionStats {
    pub fn skipped(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &PartitionStats) {
        self.rows_seen += other.rows_seen;
        self.records_written += other.records_written;
        self.whole_key_deletes += other.whole_key_deletes;
        self.group_deletes += other.group_deletes;
        for (reason, count) in &other.skipped {
            *self.skipped.entry(*reason).or_default() += count;
        }
        self.unrecognized_columns += other.unrecognized_columns;
        self.malformed_groups += other.malformed_groups;
        self.backfills += other.backfills;
        self.rescans += other.rescans;
    }

    pub fn to_json(&self) -> Value {
        let skipped: Map<String, Value> = self
            .skipped
            .iter()
            .map(|(reason, count)| (reason.as_str().to_string(), json!(count)))
            .collect();
        json!({
            "rows_seen": self.rows_seen,
            "records_written": self.records_written,
            "deletes": {
                "whole_key": self.whole_key_deletes,
                "group": self.group_deletes,
            },
            "skipped": skipped,
            "unrecognized_columns": self.unrecognized_columns,
            "malformed_groups": self.malformed_groups,
            "backfills": self.backfills,
            "rescans": self.rescans,
        })
    }

    fn count_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }
}

/// Columns and groups a row dropped, merged across its reads.
#[derive(Debug, Default)]
struct RowAnomalies {
    unrecognized: BTreeSet<ColumnKey>,
    malformed_groups: BTreeSet<String>,
}

/// Processes the rows of one partition through a single, exclusively owned sink.
pub struct PartitionWorker<'a, S: ChangeSource + ?Sized, K: SinkAdapter> {
    plan: &'a JobPlan,
    config: JobConfig,
    window: TimeWindow,
    source: &'a S,
    sink: K,
    stats: PartitionStats,
}

impl<'a, S: ChangeSource + ?Sized, K: SinkAdapter> PartitionWorker<'a, S, K> {
    pub fn new(plan: &'a JobPlan, config: JobConfig, source: &'a S, sink: K) -> Result<Self, Error> {
        Ok(Self {
            plan,
            config,
            window: config.window()?,
            source,
            sink,
            stats: PartitionStats::default(),
        })
    }

    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }

    /// Processes every row, then closes the sink.
    pub fn run<I>(mut self, rows: I) -> Result<(PartitionStats, K), Error>
    where
        I: IntoIterator<Item = ChangeRow>,
    {
        for row in rows {
            self.process_row(row)?;
        }
        self.finish()
    }

    pub fn finish(mut self) -> Result<(PartitionStats, K), Error> {
        self.sink.close()?;
        info!(
            rows = self.stats.rows_seen,
            records = self.stats.records_written,
            deletes = self.stats.whole_key_deletes + self.stats.group_deletes,
            skipped = self.stats.skipped.values().sum::<u64>(),
            "partition finished"
        );
        Ok((self.stats, self.sink))
    }

    /// Returns the number of records written for the row, or why it was skipped.
    pub fn process_row(&mut self, row: ChangeRow) -> Result<Outcome<u64>, Error> {
        self.stats.rows_seen += 1;
        let ChangeRow { row_key, cells } = row;

        let key = match self.plan.schema().row_key().parse(&row_key) {
            Outcome::Ready(key) => key,
            Outcome::Skip(reason) => return Ok(self.skip(&row_key, reason)),
        };
        if let Some(predicate) = self.plan.predicate() {
            let key_record = Record::new(key.clone());
            if predicate.evaluate(&key_record, Stage::RowKeyOnly).is_false() {
                return Ok(self.skip(&row_key, SkipReason::FilteredByRowKey));
            }
        }

        let mut anomalies = RowAnomalies::default();
        let (deletions, latest) = if self.config.incremental {
            let reconciler = MutationReconciler::new(self.plan, self.window);
            let changes = ChangeRow::new(row_key.clone(), cells);
            let result = match reconciler.reconcile(&changes) {
                Outcome::Ready(result) => result,
                Outcome::Skip(reason) => return Ok(self.skip(&row_key, reason)),
            };
            anomalies.unrecognized.extend(result.unrecognized().iter().cloned());
            anomalies
                .malformed_groups
                .extend(result.malformed_groups().iter().cloned());
            if result.is_empty() {
                self.report(&row_key, &anomalies);
                return Ok(self.skip(&row_key, SkipReason::Unchanged));
            }
            match result.supplemental_read() {
                SupplementalRead::Rescan => self.stats.rescans += 1,
                SupplementalRead::Backfill(_) => self.stats.backfills += 1,
                SupplementalRead::None => {}
            }
            let latest = reconciler.complete(self.source, &row_key, &result)?;
            (result.deletions().to_vec(), latest)
        } else {
            (Vec::new(), Outcome::Ready(cells))
        };

        let materialized = match latest {
            Outcome::Ready(cells) => {
                self.materialize(&row_key, key.clone(), &cells, &mut anomalies)
            }
            Outcome::Skip(reason) => Ok(Outcome::Skip(reason)),
        };
        self.report(&row_key, &anomalies);
        let (records, skipped) = match materialized? {
            Outcome::Ready(records) => (records, None),
            Outcome::Skip(reason) => (Vec::new(), Some(reason)),
        };

        if !deletions.is_empty() {
            let deletes = deletions
                .into_iter()
                .map(|deletion| self.delete_row(&row_key, &key, deletion))
                .collect::<Result<Vec<_>, Error>>()?;
            let summary = self.sink.process_delete_rows(deletes)?;
            self.stats.whole_key_deletes += summary.whole_key;
            self.stats.group_deletes += summary.group_scoped;
        }
        let written = records.len() as u64;
        for record in records {
            self.sink.write_row(record)?;
        }
        self.stats.records_written += written;
        self.sink.flush()?;

        match skipped {
            Some(reason) => Ok(self.skip(&row_key, reason)),
            None => Ok(Outcome::Ready(written)),
        }
    }

    fn materialize(
        &mut self,
        row_key: &Bytes,
        key: Vec<Field>,
        cells: &[Cell],
        anomalies: &mut RowAnomalies,
    ) -> Result<Outcome<Vec<Record>>, Error> {
        let fields = FieldSet::from_cells(self.plan.schema(), key, cells);
        anomalies.unrecognized.extend(fields.unrecognized().iter().cloned());
        let mut records = match RowMaterializer::new(self.plan).materialize(fields) {
            Outcome::Ready(records) => records,
            Outcome::Skip(reason) => return Ok(Outcome::Skip(reason)),
        };
        let collected: Result<Vec<Record>, Error> = records.by_ref().collect();
        anomalies
            .malformed_groups
            .extend(records.malformed_groups().iter().cloned());
        match collected {
            Ok(records) => Ok(Outcome::Ready(records)),
            Err(err) if err.kind() == ErrorKind::MalformedDocument => {
                warn!(
                    row = %row_key.to_str_lossy(),
                    error = %err,
                    "nested document could not be flattened; row skipped"
                );
                Ok(Outcome::Skip(SkipReason::MalformedDocument))
            }
            Err(err) => Err(err.with_row_key(row_key.to_vec())),
        }
    }

    fn report(&mut self, row_key: &[u8], anomalies: &RowAnomalies) {
        self.stats.unrecognized_columns += anomalies.unrecognized.len() as u64;
        self.stats.malformed_groups += anomalies.malformed_groups.len() as u64;
        for (family, qualifier) in &anomalies.unrecognized {
            let err = unrecognized_column(family, qualifier).with_row_key(row_key);
            warn!(error = %err, "unrecognized column");
        }
        let Some(layout) = self.plan.schema().dynamic_layout() else {
            return;
        };
        for group in &anomalies.malformed_groups {
            let err = layout.malformed(group).with_row_key(row_key);
            warn!(error = %err, "malformed dynamic group skipped");
        }
    }

    fn delete_row(
        &self,
        row_key: &Bytes,
        key: &[Field],
        deletion: Deletion,
    ) -> Result<DeleteRow, Error> {
        let mut group_key = Vec::new();
        if let (DeleteScope::Group(group), Some(layout)) =
            (&deletion.scope, self.plan.schema().dynamic_layout())
        {
            if !group.is_empty() {
                let components = layout
                    .components(group)
                    .map_err(|err| err.with_row_key(row_key.to_vec()))?;
                group_key = layout
                    .parts
                    .iter()
                    .zip(components)
                    .filter(|(name, _)| name.as_str() != SKIP_COMPONENT)
                    .map(|(name, value)| {
                        Field::row_key(name, value, FieldType::String).in_group(group.as_str())
                    })
                    .collect();
            }
        }
        Ok(DeleteRow {
            row_key: row_key.clone(),
            key: key.to_vec(),
            scope: deletion.scope,
            group_key,
            timestamp: deletion.timestamp,
        })
    }

    fn skip(&mut self, row_key: &[u8], reason: SkipReason) -> Outcome<u64> {
        debug!(row = %row_key.to_str_lossy(), reason = reason.as_str(), "row skipped");
        self.stats.count_skip(reason);
        Outcome::Skip(reason)
    }
}

/// Splits key-ordered rows into at most `count` contiguous partitions.
pub fn split_partitions(rows: Vec<ChangeRow>, count: usize) -> Vec<Vec<ChangeRow>> {
    let count = count.max(1);
    if rows.is_empty() {
        return vec![Vec::new()];
    }
    let chunk = rows.len().div_ceil(count);
    let mut partitions = Vec::with_capacity(count);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        partitions.push(rows.by_ref().take(chunk).collect());
    }
    partitions
}

/// Runs each partition on its own scoped thread with its own sink; stats are summed.
pub fn run_partitions<S, K, F>(
    plan: &JobPlan,
    config: JobConfig,
    source: &S,
    partitions: Vec<Vec<ChangeRow>>,
    make_sink: F,
) -> Result<(PartitionStats, Vec<K>), Error>
where
    S: ChangeSource + Sync + ?Sized,
    K: SinkAdapter + Send,
    F: Fn(usize) -> K + Sync,
{
    let results: Vec<Result<(PartitionStats, K), Error>> = thread::scope(|scope| {
        let make_sink = &make_sink;
        let handles: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .map(|(idx, rows)| {
                scope.spawn(move || {
                    PartitionWorker::new(plan, config, source, make_sink(idx))?.run(rows)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(Error::new(ErrorKind::Internal).with_message("partition worker panicked"))
                })
            })
            .collect()
    });

    let mut total = PartitionStats::default();
    let mut sinks = Vec::with_capacity(results.len());
    for result in results {
        let (stats, sink) = result?;
        total.merge(&stats);
        sinks.push(sink);
    }
    Ok((total, sinks))
}

#[cfg(test)]
mod tests {
    use super::{PartitionWorker, run_partitions, split_partitions};
    use crate::core::cell::{Cell, CellKind, ChangeRow};
    use crate::core::config::JobConfig;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::outcome::{Outcome, SkipReason};
    use crate::core::plan::{DocumentSpec, JobPlan, PlanBuilder};
    use crate::core::predicate::{Condition, FieldRef, Operator};
    use crate::core::rowkey::{RowKeyField, RowKeySpec};
    use crate::core::schema::{DynamicColumnDescriptor, SchemaBuilder, StaticColumn};
    use crate::core::sink::{DeleteScope, JsonlSink, MemorySink};
    use crate::core::source::{ChangeSource, ColumnFilter, MemoryStore, TimeWindow};
    use crate::core::value::FieldType;
    use serde_json::Value;

    fn plan(filter: Option<Condition>) -> JobPlan {
        let row_key = RowKeySpec::new(
            "|",
            vec![
                RowKeyField::plain("p"),
                RowKeyField::plain("y"),
                RowKeyField::plain("i"),
            ],
        )
        .unwrap();
        let schema = SchemaBuilder::new(row_key)
            .static_column(StaticColumn::new("D", "SR1", FieldType::String))
            .static_column(StaticColumn::new("D", "DOC", FieldType::Document))
            .dynamic_column(
                DynamicColumnDescriptor::new("D", "RC", FieldType::Int)
                    .with_prefix("RC")
                    .with_parts(["provider", "fy", "inum"], Some("|")),
            )
            .build()
            .unwrap();
        let builder = PlanBuilder::new(schema)
            .select_all()
            .flatten(DocumentSpec::new("D", "DOC").authorize("a"));
        match filter {
            Some(condition) => builder.filter(condition),
            None => builder,
        }
        .build()
        .unwrap()
    }

    fn dynamic_only_plan() -> JobPlan {
        let row_key = RowKeySpec::new(
            "|",
            vec![
                RowKeyField::plain("p"),
                RowKeyField::plain("y"),
                RowKeyField::plain("i"),
            ],
        )
        .unwrap();
        let schema = SchemaBuilder::new(row_key)
            .static_column(StaticColumn::new("D", "SR1", FieldType::String))
            .dynamic_column(
                DynamicColumnDescriptor::new("D", "RC", FieldType::Int)
                    .with_prefix("RC")
                    .with_parts(["provider", "fy", "inum"], Some("|")),
            )
            .build()
            .unwrap();
        PlanBuilder::new(schema)
            .select(FieldRef::column("D", "RC"))
            .filter(Condition::leaf(FieldRef::column("D", "SR1"), Operator::Eq, "Y"))
            .build()
            .unwrap()
    }

    struct OfflineSource;

    impl ChangeSource for OfflineSource {
        fn scan(
            &self,
            _row_key: &[u8],
            _columns: &[ColumnFilter],
            _window: TimeWindow,
        ) -> Result<Option<ChangeRow>, Error> {
            Err(Error::new(ErrorKind::Io).with_message("region offline"))
        }
    }

    fn config(min: u64) -> JobConfig {
        JobConfig {
            min_timestamp: min,
            ..JobConfig::default()
        }
    }

    #[test]
    fn static_row_is_written_and_flushed() {
        let plan = plan(Some(Condition::leaf(
            FieldRef::column("D", "SR1"),
            Operator::Eq,
            "Y",
        )));
        let store = MemoryStore::new();
        let mut worker =
            PartitionWorker::new(&plan, config(50), &store, MemorySink::new()).unwrap();
        let outcome = worker
            .process_row(ChangeRow::new("S|2017|I0001", vec![Cell::put("D", "SR1", "Y", 100)]))
            .unwrap();
        assert_eq!(outcome, Outcome::Ready(1));
        let (stats, sink) = worker.finish().unwrap();
        assert_eq!(stats.records_written, 1);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.flushes, 1);
        assert!(sink.closed);
    }

    #[test]
    fn row_key_filter_skips_before_reconciling() {
        let plan = plan(Some(Condition::leaf(FieldRef::key("p"), Operator::Eq, "T")));
        let store = MemoryStore::new();
        let rows = vec![
            ChangeRow::new("S|2017|I0001", vec![Cell::put("D", "SR1", "Y", 100)]),
            ChangeRow::new("bad-key", vec![Cell::put("D", "SR1", "Y", 100)]),
            ChangeRow::new("T|2017|I0002", vec![Cell::put("D", "SR1", "Y", 10)]),
        ];
        let worker = PartitionWorker::new(&plan, config(50), &store, MemorySink::new()).unwrap();
        let (stats, sink) = worker.run(rows).unwrap();
        assert_eq!(stats.rows_seen, 3);
        assert_eq!(stats.skipped(SkipReason::FilteredByRowKey), 1);
        assert_eq!(stats.skipped(SkipReason::MalformedRowKey), 1);
        assert_eq!(stats.skipped(SkipReason::Unchanged), 1);
        assert!(sink.records.is_empty());
        assert_eq!(sink.flushes, 0);
    }

    #[test]
    fn deletes_precede_records() {
        let plan = plan(None);
        let changes = vec![
            Cell::tombstone("D", "", 200, CellKind::DeleteFamily),
            Cell::put("D", "RCS|2017|I0001", "7", 250),
        ];
        let mut store = MemoryStore::new();
        store.insert("S|2017|I0001", Cell::put("D", "SR1", "Y", 10));
        for cell in &changes {
            store.insert("S|2017|I0001", cell.clone());
        }
        let row = ChangeRow::new("S|2017|I0001", changes);
        let mut buf = Vec::new();
        {
            let worker = PartitionWorker::new(&plan, config(50), &store, JsonlSink::new(&mut buf))
                .unwrap();
            let (stats, _) = worker.run([row]).unwrap();
            assert_eq!(stats.whole_key_deletes, 1);
            assert_eq!(stats.records_written, 1);
            assert_eq!(stats.backfills, 1);
        }
        let lines: Vec<Value> = String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["delete"]["scope"], "key");
        assert_eq!(lines[1]["key"]["inum"], "I0001");
        assert_eq!(lines[1]["columns"]["D"]["RC"], "7");
        // SR1 was written before the family tombstone, so it stays deleted
        assert!(lines[1]["columns"]["D"].get("SR1").is_none());
    }

    #[test]
    fn group_delete_carries_component_fields() {
        let plan = plan(None);
        let store = MemoryStore::new();
        let row = ChangeRow::new(
            "S|2017|I0001",
            vec![Cell::tombstone("D", "RCS|2017|I0009", 100, CellKind::DeleteColumn)],
        );
        let worker = PartitionWorker::new(&plan, config(50), &store, MemorySink::new()).unwrap();
        let (stats, sink) = worker.run([row]).unwrap();
        assert_eq!(stats.group_deletes, 1);
        let delete = &sink.deletes[0];
        assert_eq!(delete.scope, DeleteScope::Group("S|2017|I0009".into()));
        let names: Vec<_> = delete.group_key.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["provider", "fy", "inum"]);
    }

    #[test]
    fn malformed_document_skips_only_that_row() {
        let plan = plan(None);
        let store = MemoryStore::new();
        let rows = vec![
            ChangeRow::new("S|2017|I0001", vec![Cell::put("D", "DOC", "{broken", 100)]),
            ChangeRow::new("S|2017|I0002", vec![Cell::put("D", "DOC", r#"{"a":"1"}"#, 100)]),
        ];
        let worker = PartitionWorker::new(&plan, config(0), &store, MemorySink::new()).unwrap();
        let (stats, sink) = worker.run(rows).unwrap();
        assert_eq!(stats.skipped(SkipReason::MalformedDocument), 1);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(
            sink.records[0].column("D", "a").and_then(|f| f.value.as_deref()),
            Some("1")
        );
    }

    #[test]
    fn simple_path_reads_latest_values() {
        let plan = plan(None);
        let mut store = MemoryStore::new();
        store.insert("S|2017|I0001", Cell::put("D", "SR1", "old", 1));
        store.insert("S|2017|I0001", Cell::put("D", "SR1", "new", 2));
        let simple = JobConfig {
            incremental: false,
            ..JobConfig::default()
        };
        let rows: Vec<_> = store.latest(simple.window().unwrap()).collect();
        let worker = PartitionWorker::new(&plan, simple, &store, MemorySink::new()).unwrap();
        let (_, sink) = worker.run(rows).unwrap();
        assert_eq!(
            sink.records[0].column("D", "SR1").and_then(|f| f.value.as_deref()),
            Some("new")
        );
    }

    #[test]
    fn partitions_run_in_parallel_and_sum_stats() {
        let plan = plan(None);
        let mut store = MemoryStore::new();
        for idx in 0..5 {
            store.insert(format!("S|2017|I{idx}"), Cell::put("D", "SR1", "Y", 100));
        }
        let rows: Vec<_> = store.changes(config(0).window().unwrap()).collect();
        let partitions = split_partitions(rows, 2);
        assert_eq!(partitions.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 2]);

        let (stats, sinks) =
            run_partitions(&plan, config(0), &store, partitions, |_| MemorySink::new()).unwrap();
        assert_eq!(stats.rows_seen, 5);
        assert_eq!(stats.records_written, 5);
        assert_eq!(sinks.len(), 2);
        assert!(sinks.iter().all(|sink| sink.closed));
    }

    #[test]
    fn malformed_group_delete_is_dropped_and_counted() {
        let plan = plan(None);
        let store = MemoryStore::new();
        let row = ChangeRow::new(
            "S|2017|I0001",
            vec![Cell::tombstone("D", "RCS|2017", 100, CellKind::DeleteColumn)],
        );
        let worker = PartitionWorker::new(&plan, config(50), &store, MemorySink::new()).unwrap();
        let (stats, sink) = worker.run([row]).unwrap();
        assert_eq!(stats.malformed_groups, 1);
        assert_eq!(stats.group_deletes, 0);
        assert_eq!(stats.skipped(SkipReason::Unchanged), 1);
        assert!(sink.deletes.is_empty());
        assert_eq!(sink.flushes, 0);
    }

    #[test]
    fn malformed_document_still_writes_whole_key_delete() {
        let plan = plan(None);
        let changes = vec![
            Cell::tombstone("D", "", 200, CellKind::DeleteFamily),
            Cell::put("D", "DOC", "{broken", 250),
        ];
        let mut store = MemoryStore::new();
        store.insert("S|2017|I0001", Cell::put("D", "SR1", "Y", 10));
        for cell in &changes {
            store.insert("S|2017|I0001", cell.clone());
        }
        let row = ChangeRow::new("S|2017|I0001", changes);
        let worker = PartitionWorker::new(&plan, config(50), &store, MemorySink::new()).unwrap();
        let (stats, sink) = worker.run([row]).unwrap();
        assert_eq!(stats.skipped(SkipReason::MalformedDocument), 1);
        assert_eq!(stats.whole_key_deletes, 1);
        assert_eq!(sink.deletes.len(), 1);
        assert_eq!(sink.deletes[0].scope, DeleteScope::WholeKey);
        assert_eq!(sink.deletes[0].timestamp, 200);
        assert!(sink.records.is_empty());
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn failing_source_leaves_sink_untouched() {
        let plan = plan(None);
        let source = OfflineSource;
        let mut worker =
            PartitionWorker::new(&plan, config(50), &source, MemorySink::new()).unwrap();
        let row = ChangeRow::new(
            "S|2017|I0001",
            vec![
                Cell::tombstone("D", "RCS|2017|I0009", 100, CellKind::DeleteColumn),
                Cell::put("D", "RCS|2017|I0001", "7", 100),
            ],
        );
        let err = worker.process_row(row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.row_key(), Some(&b"S|2017|I0001"[..]));
        let (stats, sink) = worker.finish().unwrap();
        assert_eq!(stats.backfills, 1);
        assert_eq!(stats.group_deletes, 0);
        assert!(sink.deletes.is_empty());
        assert!(sink.records.is_empty());
        assert_eq!(sink.flushes, 0);
    }

    #[test]
    fn rescanned_row_counts_unrecognized_column_once() {
        let plan = dynamic_only_plan();
        let changes = vec![
            Cell::put("D", "SR1", "Y", 100),
            Cell::put("D", "UNKNOWN", "x", 100),
        ];
        let mut store = MemoryStore::new();
        store.insert("S|2017|I0001", Cell::put("D", "RCS|2017|I0001", "7", 10));
        for cell in &changes {
            store.insert("S|2017|I0001", cell.clone());
        }
        let row = ChangeRow::new("S|2017|I0001", changes);
        let worker = PartitionWorker::new(&plan, config(50), &store, MemorySink::new()).unwrap();
        let (stats, sink) = worker.run([row]).unwrap();
        assert_eq!(stats.rescans, 1);
        assert_eq!(stats.unrecognized_columns, 1);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(
            sink.records[0].column("D", "RC").and_then(|f| f.value.as_deref()),
            Some("7")
        );
    }
}

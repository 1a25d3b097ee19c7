// End-to-end library tests: change window -> reconcile -> materialize -> JSONL sink.
use std::fs::File;
use std::io::{BufRead, BufReader};

use cellshift::api::{
    Cell, CellKind, Condition, DeleteScope, DocumentSpec, DynamicColumnDescriptor, FieldRef,
    FieldType, JobConfig, JobPlan, JsonlSink, MemorySink, MemoryStore, Operator, PartitionWorker,
    PlanBuilder, RowKeyField, RowKeySpec, SchemaBuilder, SkipReason, StaticColumn,
};
use serde_json::Value;

fn invoice_plan(select_dynamic_only: bool) -> JobPlan {
    let row_key = RowKeySpec::new(
        "|",
        vec![
            RowKeyField::hashed("salt", 8),
            RowKeyField::plain("provider"),
            RowKeyField::plain("fy").typed(FieldType::Int),
            RowKeyField::plain("inum"),
        ],
    )
    .expect("row key");
    let schema = SchemaBuilder::new(row_key)
        .static_column(StaticColumn::new("D", "SR1", FieldType::String))
        .static_column(StaticColumn::new("D", "TOTAL", FieldType::Double))
        .static_column(StaticColumn::new("M", "META", FieldType::Document))
        .dynamic_column(
            DynamicColumnDescriptor::new("D", "RC", FieldType::Long)
                .with_prefix("RC")
                .with_parts(["line", "SKIP"], Some(":")),
        )
        .dynamic_column(
            DynamicColumnDescriptor::new("D", "QTY", FieldType::Int)
                .with_suffix("_Q")
                .with_parts(["line", "SKIP"], Some(":")),
        )
        .build()
        .expect("schema");

    let filter = Condition::leaf(FieldRef::column("D", "SR1"), Operator::Eq, "Y").and(
        Condition::leaf(FieldRef::key("fy"), Operator::Ge, "2017"),
    );
    let builder = PlanBuilder::new(schema).filter(filter);
    let builder = if select_dynamic_only {
        builder
            .select(FieldRef::column("D", "RC"))
            .select(FieldRef::column("D", "QTY"))
    } else {
        builder
            .select_all()
            .flatten(DocumentSpec::new("M", "META").authorize("tags"))
    };
    builder.build().expect("plan")
}

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    let file = File::open(path).expect("open output");
    BufReader::new(file)
        .lines()
        .map(|line| serde_json::from_str(&line.expect("line")).expect("json"))
        .collect()
}

#[test]
fn incremental_run_writes_groups_and_documents() {
    let plan = invoice_plan(false);
    let key = plan
        .schema()
        .row_key()
        .encode(&["S", "2017", "I0001"])
        .expect("encode");

    let mut store = MemoryStore::new();
    // already migrated: only the backfill read sees these
    store.insert(key.clone(), Cell::put("D", "SR1", "Y", 10));
    store.insert(key.clone(), Cell::put("D", "TOTAL", "99.5", 10));
    store.insert(key.clone(), Cell::put("M", "META", r#"{"tags":["a","b"],"src":"x"}"#, 10));
    // the change window
    store.insert(key.clone(), Cell::put("D", "RC1:0", "10", 100));
    store.insert(key.clone(), Cell::put("D", "2:0_Q", "3", 110));
    store.insert(key.clone(), Cell::put("D", "RC2:0", "20", 120));

    let config = JobConfig {
        min_timestamp: 50,
        ..JobConfig::default()
    };
    let rows: Vec<_> = store.changes(config.window().expect("window")).collect();
    assert_eq!(rows.len(), 1);

    let temp = tempfile::tempdir().expect("tempdir");
    let out_path = temp.path().join("out.jsonl");
    let out = File::create(&out_path).expect("create output");
    let worker = PartitionWorker::new(&plan, config, &store, JsonlSink::new(out)).expect("worker");
    let (stats, _) = worker.run(rows).expect("run");

    assert_eq!(stats.backfills, 1);
    assert_eq!(stats.rescans, 0);
    // two groups, each fanned out over two tags
    assert_eq!(stats.records_written, 4);

    let lines = read_lines(&out_path);
    assert_eq!(lines.len(), 4);
    let first = &lines[0];
    assert_eq!(first["key"]["provider"], "S");
    assert_eq!(first["key"]["line"], "1");
    assert!(first["key"].get("SKIP").is_none());
    assert!(first["key"].get("salt").is_none());
    assert_eq!(first["columns"]["D"]["RC"], "10");
    assert_eq!(first["columns"]["D"]["SR1"], "Y");
    assert_eq!(first["columns"]["M"]["tags"], "a");
    assert_eq!(first["columns"]["M"]["src"], "x");
    assert!(first["columns"]["M"].get("META").is_none());

    let second_group: Vec<&Value> = lines
        .iter()
        .filter(|line| line["key"]["line"] == "2")
        .collect();
    assert_eq!(second_group.len(), 2);
    assert_eq!(second_group[0]["columns"]["D"]["RC"], "20");
    assert_eq!(second_group[0]["columns"]["D"]["QTY"], "3");
}

#[test]
fn static_change_under_dynamic_selection_rescans_and_filters() {
    let plan = invoice_plan(true);
    let key = plan
        .schema()
        .row_key()
        .encode(&["S", "2018", "I0002"])
        .expect("encode");

    let mut store = MemoryStore::new();
    store.insert(key.clone(), Cell::put("D", "RC1:0", "10", 10));
    store.insert(key.clone(), Cell::put("D", "SR1", "Y", 10));
    store.insert(key.clone(), Cell::put("D", "SR1", "N", 100));

    let config = JobConfig {
        min_timestamp: 50,
        ..JobConfig::default()
    };
    let rows: Vec<_> = store.changes(config.window().expect("window")).collect();
    let worker = PartitionWorker::new(&plan, config, &store, MemorySink::new()).expect("worker");
    let (stats, sink) = worker.run(rows).expect("run");

    assert_eq!(stats.rescans, 1);
    assert_eq!(stats.backfills, 0);
    assert_eq!(stats.skipped(SkipReason::FilteredByStatic), 1);
    assert!(sink.records.is_empty());
}

#[test]
fn tombstones_reach_the_sink_before_rewritten_rows() {
    let plan = invoice_plan(false);
    let key = plan
        .schema()
        .row_key()
        .encode(&["S", "2019", "I0003"])
        .expect("encode");

    let mut store = MemoryStore::new();
    for family in ["D", "M"] {
        store.insert(key.clone(), Cell::put(family, "SR1", "Y", 10));
        store.insert(key.clone(), Cell::tombstone(family, "", 200, CellKind::DeleteFamily));
    }
    store.insert(key.clone(), Cell::put("D", "SR1", "Y", 250));
    store.insert(key.clone(), Cell::put("D", "RC7:0", "70", 250));

    let config = JobConfig {
        min_timestamp: 150,
        ..JobConfig::default()
    };
    let rows: Vec<_> = store.changes(config.window().expect("window")).collect();
    let worker = PartitionWorker::new(&plan, config, &store, MemorySink::new()).expect("worker");
    let (stats, sink) = worker.run(rows).expect("run");

    assert_eq!(stats.whole_key_deletes, 1);
    assert_eq!(sink.deletes.len(), 1);
    assert_eq!(sink.deletes[0].scope, DeleteScope::WholeKey);
    assert_eq!(sink.deletes[0].timestamp, 200);
    assert_eq!(sink.records.len(), 1);
    let record = &sink.records[0];
    assert_eq!(record.key_field("line").and_then(|f| f.value.as_deref()), Some("7"));
    assert_eq!(record.column("D", "RC").and_then(|f| f.value.as_deref()), Some("70"));
}

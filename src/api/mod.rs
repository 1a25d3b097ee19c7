//! Purpose: Define the stable public Rust API boundary for cellshift.
//! Exports: Job construction, change sources, sinks, the partition engine and errors.
//! Role: Public, additive-only surface used by the CLI and integration tests.
//! Invariants: Everything a caller needs to run a job is reachable from here.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::cell::{Cell, CellKind, ChangeRow, ColumnKey};
pub use crate::core::config::{JobConfig, JobSpec};
pub use crate::core::document::{FlatField, FlatRow, flatten_document};
pub use crate::core::engine::{PartitionStats, PartitionWorker, run_partitions, split_partitions};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::materialize::{FieldSet, Materialized, RowMaterializer};
pub use crate::core::outcome::{Outcome, SkipReason};
pub use crate::core::plan::{DocumentSpec, JobPlan, PlanBuilder};
pub use crate::core::predicate::{Condition, FieldRef, Operator, Predicate, Stage, Truth};
pub use crate::core::reconcile::{MutationReconciler, ReconciliationResult, SupplementalRead};
pub use crate::core::record::{Field, FieldOrigin, Record};
pub use crate::core::rowkey::{RowKeyField, RowKeySpec};
pub use crate::core::schema::{
    Classification, DynamicColumnDescriptor, DynamicLayout, ResolvedSchema, SchemaBuilder,
    StaticColumn, unrecognized_column,
};
pub use crate::core::sink::{DeleteRow, DeleteScope, DeleteSummary, JsonlSink, MemorySink, SinkAdapter};
pub use crate::core::source::{ChangeSource, ColumnFilter, MemoryStore, TimeWindow};
pub use crate::core::value::FieldType;

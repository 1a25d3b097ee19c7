// Core modules: value model, schema, predicate, reconciliation, materialization and I/O seams.
pub mod cell;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod materialize;
pub mod outcome;
pub mod plan;
pub mod predicate;
pub mod reconcile;
pub mod record;
pub mod rowkey;
pub mod schema;
pub mod sink;
pub mod source;
pub mod value;

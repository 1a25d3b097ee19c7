//! Purpose: Shared library crate used by the `cellshift` CLI and tests.
//! Exports: `api` (stable surface), `core` (schema, predicate, reconciler, materializer).
//! Role: Turns wide-column change windows into normalized output records and deletes.
//! Invariants: Callers go through `api`; `core` paths may change between releases.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;

//! Purpose: Explicit "ready or skip" result for row-level operations.
//! Exports: `Outcome`, `SkipReason`.
//! Role: Keeps recoverable skips out of the error channel; fatal problems stay in `Error`.
//! Invariants: A `Skip` never carries partial output.

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SkipReason {
    MalformedRowKey,
    FilteredByRowKey,
    FilteredByStatic,
    Unchanged,
    RowVanished,
    MalformedDocument,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MalformedRowKey => "malformed_row_key",
            SkipReason::FilteredByRowKey => "filtered_by_row_key",
            SkipReason::FilteredByStatic => "filtered_by_static",
            SkipReason::Unchanged => "unchanged",
            SkipReason::RowVanished => "row_vanished",
            SkipReason::MalformedDocument => "malformed_document",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome<T> {
    Ready(T),
    Skip(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Outcome::Ready(_) => None,
            Outcome::Skip(reason) => Some(*reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::Skip(reason) => Outcome::Skip(reason),
        }
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Skip(_) => None,
        }
    }
}

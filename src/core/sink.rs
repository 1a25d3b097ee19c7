//! Purpose: Write side of the engine: sink-adapter contract plus JSONL and in-memory sinks.
//! Exports: `SinkAdapter`, `DeleteRow`, `DeleteScope`, `DeleteSummary`, `JsonlSink`, `MemorySink`.
//! Role: One stateful sink per partition; the worker flushes after each row and closes once.
//! Invariants: Sinks take ownership of records; the engine never retries a sink call.
//! Invariants: Any call after `close` is a usage error.
use std::io::{BufWriter, Write};

use bytes::Bytes;
use bstr::ByteSlice;
use serde_json::{Map, Value, json};

use crate::core::error::{Error, ErrorKind};
use crate::core::record::{Field, Record};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DeleteScope {
    /// Every output row derived from the key.
    WholeKey,
    /// Output rows of one dynamic group; the empty group addresses the static row.
    Group(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteRow {
    pub row_key: Bytes,
    pub key: Vec<Field>,
    pub scope: DeleteScope,
    /// Dynamic-part components of a group-scoped delete (empty otherwise).
    pub group_key: Vec<Field>,
    pub timestamp: u64,
}

impl DeleteRow {
    pub fn to_json(&self) -> Value {
        let mut key = Map::new();
        for field in self.key.iter().chain(self.group_key.iter()) {
            key.insert(field.name.clone(), json!(field.value));
        }
        let (scope, group) = match &self.scope {
            DeleteScope::WholeKey => ("key", Value::Null),
            DeleteScope::Group(group) => ("group", json!(group)),
        };
        json!({
            "delete": {
                "scope": scope,
                "row": self.row_key.to_str_lossy(),
                "key": Value::Object(key),
                "group": group,
                "ts": self.timestamp,
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeleteSummary {
    pub whole_key: u64,
    pub group_scoped: u64,
}

impl DeleteSummary {
    pub fn total(&self) -> u64 {
        self.whole_key + self.group_scoped
    }
}

pub trait SinkAdapter {
    /// Writes one record and returns the structured form actually written.
    fn write_row(&mut self, record: Record) -> Result<Value, Error>;

    fn process_delete_rows(&mut self, deletes: Vec<DeleteRow>) -> Result<DeleteSummary, Error>;

    fn flush(&mut self) -> Result<(), Error>;

    fn close(&mut self) -> Result<(), Error>;
}

fn summarize(deletes: &[DeleteRow]) -> DeleteSummary {
    let whole_key = deletes
        .iter()
        .filter(|delete| delete.scope == DeleteScope::WholeKey)
        .count() as u64;
    DeleteSummary {
        whole_key,
        group_scoped: deletes.len() as u64 - whole_key,
    }
}

fn closed_error() -> Error {
    Error::new(ErrorKind::Usage).with_message("sink is already closed")
}

/// Writes one JSON object per line: records as-is, deletes wrapped in `{"delete": ..}`.
pub struct JsonlSink<W: Write> {
    out: Option<BufWriter<W>>,
    closed: Option<W>,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: Some(BufWriter::new(writer)),
            closed: None,
        }
    }

    /// Hands back the underlying writer, flushing first if the sink is still open.
    pub fn into_inner(self) -> Result<W, Error> {
        if let Some(writer) = self.closed {
            return Ok(writer);
        }
        let out = self.out.ok_or_else(closed_error)?;
        out.into_inner().map_err(|err| io_error(err.into_error()))
    }

    fn write_line(&mut self, value: &Value) -> Result<(), Error> {
        let out = self.out.as_mut().ok_or_else(closed_error)?;
        serde_json::to_writer(&mut *out, value).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to encode output line")
                .with_source(err)
        })?;
        out.write_all(b"\n").map_err(io_error)
    }
}

fn io_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write sink output")
        .with_source(err)
}

impl<W: Write> SinkAdapter for JsonlSink<W> {
    fn write_row(&mut self, record: Record) -> Result<Value, Error> {
        let value = record.to_json();
        self.write_line(&value)?;
        Ok(value)
    }

    fn process_delete_rows(&mut self, deletes: Vec<DeleteRow>) -> Result<DeleteSummary, Error> {
        for delete in &deletes {
            self.write_line(&delete.to_json())?;
        }
        Ok(summarize(&deletes))
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.out
            .as_mut()
            .ok_or_else(closed_error)?
            .flush()
            .map_err(io_error)
    }

    fn close(&mut self) -> Result<(), Error> {
        let out = self.out.take().ok_or_else(closed_error)?;
        let writer = out.into_inner().map_err(|err| io_error(err.into_error()))?;
        self.closed = Some(writer);
        Ok(())
    }
}

/// Keeps everything in memory; handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
    pub deletes: Vec<DeleteRow>,
    pub flushes: usize,
    pub closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SinkAdapter for MemorySink {
    fn write_row(&mut self, record: Record) -> Result<Value, Error> {
        if self.closed {
            return Err(closed_error());
        }
        let value = record.to_json();
        self.records.push(record);
        Ok(value)
    }

    fn process_delete_rows(&mut self, deletes: Vec<DeleteRow>) -> Result<DeleteSummary, Error> {
        if self.closed {
            return Err(closed_error());
        }
        let summary = summarize(&deletes);
        self.deletes.extend(deletes);
        Ok(summary)
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(closed_error());
        }
        self.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(closed_error());
        }
        self.closed = true;
        Ok(())
    }
}

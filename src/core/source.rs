//! Purpose: Read side of the engine: the change-source contract and an in-memory store.
//! Exports: `ChangeSource`, `ColumnFilter`, `TimeWindow`, `MemoryStore`.
//! Role: `scan` backs the two supplemental reads (backfill, reprocess rescan);
//!       `MemoryStore` feeds tests and the CLI with raw versions and tombstones.
//! Invariants: `scan` returns at most one row and only the latest visible value per column.
//! Invariants: Delete markers mask puts the way the wide-column store does.
use std::collections::BTreeMap;
use std::io::BufRead;

use bytes::Bytes;
use serde::Deserialize;

use crate::core::cell::{Cell, CellKind, ChangeRow};
use crate::core::error::{Error, ErrorKind};

/// Inclusive timestamp bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeWindow {
    pub min: u64,
    pub max: u64,
}

impl TimeWindow {
    pub fn new(min: u64, max: u64) -> Result<Self, Error> {
        if min > max {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("time window is inverted ({min} > {max})")));
        }
        Ok(Self { min, max })
    }

    pub fn unbounded() -> Self {
        Self { min: 0, max: u64::MAX }
    }

    /// Everything visible at `max`, regardless of the window start.
    pub fn up_to_max(self) -> Self {
        Self { min: 0, max: self.max }
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        self.min <= timestamp && timestamp <= self.max
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ColumnFilter {
    Family(String),
    Column { family: String, qualifier: Vec<u8> },
}

impl ColumnFilter {
    pub fn matches(&self, family: &str, qualifier: &[u8]) -> bool {
        match self {
            ColumnFilter::Family(wanted) => wanted == family,
            ColumnFilter::Column {
                family: wanted,
                qualifier: wanted_qualifier,
            } => wanted == family && wanted_qualifier.as_slice() == qualifier,
        }
    }
}

/// Key-exact read capability of the source store.
pub trait ChangeSource {
    /// Latest visible value of each matching column for exactly `row_key`.
    fn scan(
        &self,
        row_key: &[u8],
        columns: &[ColumnFilter],
        window: TimeWindow,
    ) -> Result<Option<ChangeRow>, Error>;
}

impl<T: ChangeSource + ?Sized> ChangeSource for &T {
    fn scan(
        &self,
        row_key: &[u8],
        columns: &[ColumnFilter],
        window: TimeWindow,
    ) -> Result<Option<ChangeRow>, Error> {
        (**self).scan(row_key, columns, window)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    rows: BTreeMap<Bytes, Vec<Cell>>,
}

#[derive(Debug, Deserialize)]
struct CellLine {
    row: String,
    family: String,
    #[serde(default)]
    qualifier: String,
    #[serde(default)]
    value: Option<String>,
    ts: u64,
    #[serde(default = "default_kind")]
    kind: CellKind,
}

fn default_kind() -> CellKind {
    CellKind::Put
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row_key: impl Into<Bytes>, cell: Cell) {
        self.rows.entry(row_key.into()).or_default().push(cell);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Loads a table dump: one JSON object per line
    /// (`{"row", "family", "qualifier", "value", "ts", "kind"}`).
    pub fn from_jsonl<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut store = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read table dump")
                    .with_source(err)
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: CellLine = serde_json::from_str(&line).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid cell on line {}", idx + 1))
                    .with_source(err)
            })?;
            let cell = match parsed.kind {
                CellKind::Put => Cell::put(
                    parsed.family,
                    parsed.qualifier,
                    parsed.value.unwrap_or_default(),
                    parsed.ts,
                ),
                kind => Cell::tombstone(parsed.family, parsed.qualifier, parsed.ts, kind),
            };
            store.insert(parsed.row, cell);
        }
        Ok(store)
    }

    /// Raw change records: every version and tombstone stamped inside `window`.
    pub fn changes(&self, window: TimeWindow) -> impl Iterator<Item = ChangeRow> + '_ {
        self.rows.iter().filter_map(move |(row_key, cells)| {
            let cells: Vec<Cell> = cells
                .iter()
                .filter(|cell| window.contains(cell.timestamp()))
                .cloned()
                .collect();
            (!cells.is_empty()).then(|| ChangeRow::new(row_key.clone(), cells))
        })
    }

    /// Latest visible values per row, for the non-incremental path.
    pub fn latest(&self, window: TimeWindow) -> impl Iterator<Item = ChangeRow> + '_ {
        self.rows.iter().filter_map(move |(row_key, cells)| {
            let cells = visible(cells, window, &[]);
            (!cells.is_empty()).then(|| ChangeRow::new(row_key.clone(), cells))
        })
    }
}

impl ChangeSource for MemoryStore {
    fn scan(
        &self,
        row_key: &[u8],
        columns: &[ColumnFilter],
        window: TimeWindow,
    ) -> Result<Option<ChangeRow>, Error> {
        let Some((key, cells)) = self.rows.get_key_value(row_key) else {
            return Ok(None);
        };
        let cells = visible(cells, window, columns);
        Ok((!cells.is_empty()).then(|| ChangeRow::new(key.clone(), cells)))
    }
}

fn visible(cells: &[Cell], window: TimeWindow, columns: &[ColumnFilter]) -> Vec<Cell> {
    let markers: Vec<&Cell> = cells
        .iter()
        .filter(|cell| cell.kind().is_delete() && cell.timestamp() <= window.max)
        .collect();
    let mut latest: BTreeMap<(&str, &[u8]), &Cell> = BTreeMap::new();
    for cell in cells {
        if !cell.is_put() || !window.contains(cell.timestamp()) {
            continue;
        }
        if !columns.is_empty()
            && !columns
                .iter()
                .any(|filter| filter.matches(cell.family(), cell.qualifier()))
        {
            continue;
        }
        if markers.iter().any(|marker| masks(marker, cell)) {
            continue;
        }
        let slot = latest.entry((cell.family(), cell.qualifier())).or_insert(cell);
        if cell.supersedes(slot) {
            *slot = cell;
        }
    }
    latest.into_values().cloned().collect()
}

fn masks(marker: &Cell, put: &Cell) -> bool {
    if marker.family() != put.family() {
        return false;
    }
    let same_column = marker.qualifier() == put.qualifier();
    match marker.kind() {
        CellKind::DeleteFamily => marker.timestamp() >= put.timestamp(),
        CellKind::DeleteFamilyVersion => marker.timestamp() == put.timestamp(),
        CellKind::DeleteColumn => same_column && marker.timestamp() >= put.timestamp(),
        CellKind::Delete => same_column && marker.timestamp() == put.timestamp(),
        CellKind::Put => false,
    }
}

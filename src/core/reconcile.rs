//! Purpose: Turn one key's raw change window into deletions, group buckets and a read plan.
//! Exports: `MutationReconciler`, `ReconciliationResult`, `GroupChanges`, `Deletion`,
//!          `SupplementalRead`.
//! Role: `reconcile` is pure; `complete` performs the single supplemental read it asked for.
//! Invariants: Same cell set, same result, whatever the input order.
//! Invariants: At most one read per key: a reprocess rescan or a backfill, never both.
//! Invariants: Read failures propagate; no partial cell set is returned.
use std::collections::{BTreeMap, BTreeSet};

use bstr::ByteSlice;
use tracing::debug;

use crate::core::cell::{Cell, CellKind, ChangeRow, ColumnKey};
use crate::core::error::Error;
use crate::core::outcome::{Outcome, SkipReason};
use crate::core::plan::JobPlan;
use crate::core::sink::DeleteScope;
use crate::core::source::{ChangeSource, ColumnFilter, TimeWindow};

/// Group id of static columns.
pub const STATIC_GROUP: &str = "";

fn keep_latest(slots: &mut BTreeMap<ColumnKey, Cell>, cell: &Cell) {
    match slots.get(&cell.column_key()) {
        Some(current) if !cell.supersedes(current) => {}
        _ => {
            slots.insert(cell.column_key(), cell.clone());
        }
    }
}

/// Latest eligible put and delete per column for one group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupChanges {
    puts: BTreeMap<ColumnKey, Cell>,
    deletes: BTreeMap<ColumnKey, Cell>,
}

impl GroupChanges {
    pub fn puts(&self) -> impl Iterator<Item = &Cell> {
        self.puts.values()
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Cell> {
        self.deletes.values()
    }

    pub fn has_put(&self) -> bool {
        !self.puts.is_empty()
    }

    pub fn has_delete(&self) -> bool {
        !self.deletes.is_empty()
    }

    fn has_put_for(&self, family: &str, qualifier: &[u8]) -> bool {
        self.puts
            .contains_key(&(family.to_string(), qualifier.to_vec()))
    }

    fn latest_delete(&self) -> u64 {
        self.deletes.values().map(Cell::timestamp).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Deletion {
    pub scope: DeleteScope,
    pub timestamp: u64,
}

/// The one read `complete` will issue for a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SupplementalRead<'a> {
    None,
    Backfill(&'a [ColumnFilter]),
    Rescan,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconciliationResult {
    family_tombstones: BTreeMap<String, u64>,
    tombstoned_all: bool,
    groups: BTreeMap<String, GroupChanges>,
    deletions: Vec<Deletion>,
    backfill: Vec<ColumnFilter>,
    must_reprocess: bool,
    unrecognized: BTreeSet<ColumnKey>,
    malformed_groups: BTreeSet<String>,
}

impl ReconciliationResult {
    pub fn family_tombstones(&self) -> &BTreeMap<String, u64> {
        &self.family_tombstones
    }

    /// Every required family carries a family tombstone inside the window.
    pub fn tombstoned_all(&self) -> bool {
        self.tombstoned_all
    }

    pub fn groups(&self) -> &BTreeMap<String, GroupChanges> {
        &self.groups
    }

    pub fn group(&self, group_id: &str) -> Option<&GroupChanges> {
        self.groups.get(group_id)
    }

    pub fn deletions(&self) -> &[Deletion] {
        &self.deletions
    }

    pub fn must_reprocess(&self) -> bool {
        self.must_reprocess
    }

    pub fn backfill(&self) -> &[ColumnFilter] {
        &self.backfill
    }

    /// Eligible columns that matched no static or dynamic descriptor.
    pub fn unrecognized(&self) -> &BTreeSet<ColumnKey> {
        &self.unrecognized
    }

    /// Dynamic group ids that did not split into the expected components; their cells
    /// are neither grouped, deleted nor backfilled.
    pub fn malformed_groups(&self) -> &BTreeSet<String> {
        &self.malformed_groups
    }

    /// Nothing to delete, read or materialize: every eligible cell was dropped.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.deletions.is_empty() && !self.must_reprocess
    }

    pub fn supplemental_read(&self) -> SupplementalRead<'_> {
        if self.must_reprocess {
            SupplementalRead::Rescan
        } else if !self.backfill.is_empty() {
            SupplementalRead::Backfill(&self.backfill)
        } else {
            SupplementalRead::None
        }
    }
}

pub struct MutationReconciler<'a> {
    plan: &'a JobPlan,
    window: TimeWindow,
}

impl<'a> MutationReconciler<'a> {
    pub fn new(plan: &'a JobPlan, window: TimeWindow) -> Self {
        Self { plan, window }
    }

    pub fn reconcile(&self, row: &ChangeRow) -> Outcome<ReconciliationResult> {
        let mut result = ReconciliationResult::default();

        let mut required = 0usize;
        for family in self.plan.required_families() {
            required += 1;
            let Some(marker) = row.latest_family_marker(family) else {
                continue;
            };
            if marker.kind().is_family_delete() && marker.timestamp() >= self.window.min {
                result
                    .family_tombstones
                    .insert(family.to_string(), marker.timestamp());
            }
        }
        result.tombstoned_all = required > 0 && result.family_tombstones.len() == required;

        if let Some(&timestamp) = result.family_tombstones.values().max() {
            result.deletions.push(Deletion {
                scope: DeleteScope::WholeKey,
                timestamp,
            });
            if !result.tombstoned_all {
                debug!(
                    row = %row.row_key.to_str_lossy(),
                    tombstoned = result.family_tombstones.len(),
                    required,
                    "family tombstones on some required families; rescanning row"
                );
                result.must_reprocess = true;
                return Outcome::Ready(result);
            }
        }

        let mut puts: Vec<(String, &Cell)> = Vec::new();
        let mut deletes: Vec<(String, &Cell)> = Vec::new();
        for cell in &row.cells {
            if !self.is_eligible(cell, &result.family_tombstones) {
                continue;
            }
            let Some(classification) = self.plan.schema().classify(cell.family(), cell.qualifier())
            else {
                result.unrecognized.insert(cell.column_key());
                continue;
            };
            let group = classification.group_id().to_string();
            if group != STATIC_GROUP && !self.splits(&group) {
                result.malformed_groups.insert(group);
                continue;
            }
            if cell.is_put() {
                puts.push((group, cell));
            } else {
                deletes.push((group, cell));
            }
        }

        if puts.is_empty() && deletes.is_empty() {
            let dropped = !result.unrecognized.is_empty() || !result.malformed_groups.is_empty();
            if result.deletions.is_empty() && !dropped {
                return Outcome::Skip(SkipReason::Unchanged);
            }
            return Outcome::Ready(result);
        }

        for (group, cell) in &deletes {
            keep_latest(&mut result.groups.entry(group.clone()).or_default().deletes, cell);
        }
        for (group, cell) in &puts {
            if deletes.iter().any(|(_, marker)| masks_put(marker, cell)) {
                continue;
            }
            keep_latest(&mut result.groups.entry(group.clone()).or_default().puts, cell);
        }

        if self.plan.selection_hides_static_filter() && result.groups.contains_key(STATIC_GROUP) {
            debug!(
                row = %row.row_key.to_str_lossy(),
                "static change under a dynamic-only selection; rescanning row"
            );
            result.must_reprocess = true;
        }

        if result.deletions.is_empty() {
            result.deletions = self.group_deletions(&result.groups);
        }

        if !result.must_reprocess {
            result.backfill = self.missing_columns(&result.groups);
        }
        Outcome::Ready(result)
    }

    /// Issues the one read `result` asks for and returns the row's latest put cells.
    pub fn complete<S: ChangeSource + ?Sized>(
        &self,
        source: &S,
        row_key: &[u8],
        result: &ReconciliationResult,
    ) -> Result<Outcome<Vec<Cell>>, Error> {
        let mut merged: BTreeMap<ColumnKey, Cell> = BTreeMap::new();
        match result.supplemental_read() {
            SupplementalRead::Rescan => {
                let families: Vec<ColumnFilter> = self
                    .plan
                    .required_families()
                    .map(|family| ColumnFilter::Family(family.to_string()))
                    .collect();
                debug!(row = %row_key.to_str_lossy(), "reprocess rescan");
                let row = source
                    .scan(row_key, &families, self.window.up_to_max())
                    .map_err(|err| err.with_row_key(row_key))?;
                return Ok(match row {
                    Some(row) => Outcome::Ready(row.cells.into_iter().filter(Cell::is_put).collect()),
                    None => Outcome::Skip(SkipReason::RowVanished),
                });
            }
            SupplementalRead::Backfill(columns) => {
                debug!(
                    row = %row_key.to_str_lossy(),
                    columns = columns.len(),
                    "backfilling columns missing from the change window"
                );
                let row = source
                    .scan(row_key, columns, self.window.up_to_max())
                    .map_err(|err| err.with_row_key(row_key))?;
                for cell in row.into_iter().flat_map(|row| row.cells) {
                    if cell.is_put() {
                        merged.insert(cell.column_key(), cell);
                    }
                }
            }
            SupplementalRead::None => {}
        }
        for group in result.groups.values() {
            for cell in group.puts() {
                merged.insert(cell.column_key(), cell.clone());
            }
        }
        Ok(Outcome::Ready(merged.into_values().collect()))
    }

    fn is_eligible(&self, cell: &Cell, tombstones: &BTreeMap<String, u64>) -> bool {
        let kind = cell.kind();
        if kind.is_family_delete() || cell.timestamp() > self.window.max {
            return false;
        }
        // deletes from just before the window still count
        if cell.timestamp() < self.window.min && !kind.is_delete() {
            return false;
        }
        match tombstones.get(cell.family()) {
            Some(&tombstone) => cell.timestamp() > tombstone,
            None => true,
        }
    }

    fn splits(&self, group: &str) -> bool {
        self.plan
            .schema()
            .dynamic_layout()
            .is_some_and(|layout| layout.split(group).is_some())
    }

    fn group_deletions(&self, groups: &BTreeMap<String, GroupChanges>) -> Vec<Deletion> {
        let dynamic: Vec<Deletion> = groups
            .iter()
            .filter(|(group, changes)| group.as_str() != STATIC_GROUP && changes.has_delete())
            .map(|(group, changes)| Deletion {
                scope: DeleteScope::Group(group.clone()),
                timestamp: changes.latest_delete(),
            })
            .collect();
        if !dynamic.is_empty() {
            return dynamic;
        }
        groups
            .get(STATIC_GROUP)
            .filter(|changes| changes.has_delete())
            .map(|changes| Deletion {
                scope: DeleteScope::Group(STATIC_GROUP.to_string()),
                timestamp: changes.latest_delete(),
            })
            .into_iter()
            .collect()
    }

    fn missing_columns(&self, groups: &BTreeMap<String, GroupChanges>) -> Vec<ColumnFilter> {
        let empty = GroupChanges::default();
        let statics = groups.get(STATIC_GROUP).unwrap_or(&empty);
        let mut missing: Vec<ColumnFilter> = self
            .plan
            .required_static_columns()
            .filter(|column| !statics.has_put_for(&column.family, &column.qualifier))
            .map(|column| ColumnFilter::Column {
                family: column.family.clone(),
                qualifier: column.qualifier.clone(),
            })
            .collect();
        for (group, changes) in groups.iter().filter(|(group, _)| !group.is_empty()) {
            for descriptor in self.plan.required_dynamic_columns() {
                let qualifier = descriptor.qualifier_for(group);
                if !changes.has_put_for(&descriptor.family, &qualifier) {
                    missing.push(ColumnFilter::Column {
                        family: descriptor.family.clone(),
                        qualifier,
                    });
                }
            }
        }
        missing.sort();
        missing.dedup();
        missing
    }
}

fn masks_put(marker: &Cell, put: &Cell) -> bool {
    if marker.family() != put.family() || marker.qualifier() != put.qualifier() {
        return false;
    }
    match marker.kind() {
        CellKind::DeleteColumn => marker.timestamp() >= put.timestamp(),
        CellKind::Delete => marker.timestamp() == put.timestamp(),
        _ => false,
    }
}

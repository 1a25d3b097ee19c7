//! Purpose: Expand one row's latest cells into output records, one per dynamic group.
//! Exports: `FieldSet`, `RowMaterializer`, `Materialized`.
//! Role: Runs the static-stage gate, builds per-group candidates, applies the full-stage
//!       filter, projects to the selection and fans out nested documents.
//! Invariants: Candidates are independent copies of the static record.
//! Invariants: Unrecognized columns and malformed groups are collected, never reported
//!             here; a malformed document ends the row with `Err`.
//! Invariants: `Materialized` is lazy and single-pass.
use std::collections::{BTreeMap, BTreeSet, VecDeque, btree_map};

use bstr::ByteSlice;

use crate::core::cell::{Cell, ColumnKey};
use crate::core::document::flatten_document;
use crate::core::error::Error;
use crate::core::outcome::{Outcome, SkipReason};
use crate::core::plan::{DocumentSpec, JobPlan};
use crate::core::predicate::{EvalContext, Stage, Truth};
use crate::core::record::{Field, Record};
use crate::core::schema::{Classification, ResolvedSchema, SKIP_COMPONENT};
use crate::core::value::FieldType;

/// A row's classified latest values: key fields, static fields and dynamic groups.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldSet {
    key: Vec<Field>,
    statics: Vec<Field>,
    groups: BTreeMap<String, Vec<Field>>,
    unrecognized: BTreeSet<ColumnKey>,
}

impl FieldSet {
    pub fn new(key: Vec<Field>) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    /// Classifies latest put cells; cells matching no descriptor are dropped and remembered.
    pub fn from_cells(schema: &ResolvedSchema, key: Vec<Field>, cells: &[Cell]) -> Self {
        let mut set = Self::new(key);
        for cell in cells.iter().filter(|cell| cell.is_put()) {
            let value = cell.value().map(|raw| raw.to_str_lossy().into_owned());
            match schema.classify(cell.family(), cell.qualifier()) {
                None => {
                    set.unrecognized.insert(cell.column_key());
                }
                Some(Classification::Static(column)) => set.statics.push(Field::column(
                    &column.family,
                    &column.name,
                    value,
                    column.field_type,
                )),
                Some(Classification::Dynamic {
                    descriptor,
                    dynamic_part,
                }) => {
                    let field = Field::column(
                        &descriptor.family,
                        &descriptor.name,
                        value,
                        descriptor.field_type,
                    )
                    .in_group(dynamic_part.as_str());
                    set.groups.entry(dynamic_part).or_default().push(field);
                }
            }
        }
        set
    }

    pub fn key(&self) -> &[Field] {
        &self.key
    }

    pub fn statics(&self) -> &[Field] {
        &self.statics
    }

    pub fn groups(&self) -> &BTreeMap<String, Vec<Field>> {
        &self.groups
    }

    pub fn unrecognized(&self) -> &BTreeSet<ColumnKey> {
        &self.unrecognized
    }

    pub fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.groups.is_empty()
    }

    fn static_record(&self) -> Record {
        self.statics
            .iter()
            .cloned()
            .fold(Record::new(self.key.clone()), Record::with_column)
    }
}

pub struct RowMaterializer<'a> {
    plan: &'a JobPlan,
}

impl<'a> RowMaterializer<'a> {
    pub fn new(plan: &'a JobPlan) -> Self {
        Self { plan }
    }

    pub fn materialize(&self, fields: FieldSet) -> Outcome<Materialized<'a>> {
        let base = fields.static_record();
        let mut context = self.plan.predicate().map(EvalContext::new);
        if let (Some(predicate), Some(context)) = (self.plan.predicate(), context.as_mut()) {
            if context
                .evaluate(predicate, &base, Stage::StaticAndRowKey)
                .is_false()
            {
                return Outcome::Skip(SkipReason::FilteredByStatic);
            }
        }
        let static_pending = !self.plan.schema().has_dynamic() || fields.groups.is_empty();
        Outcome::Ready(Materialized {
            plan: self.plan,
            context,
            base,
            static_pending,
            groups: fields.groups.into_iter(),
            pending: VecDeque::new(),
            malformed_groups: BTreeSet::new(),
            failed: false,
        })
    }
}

/// Lazy record sequence for one row.
pub struct Materialized<'a> {
    plan: &'a JobPlan,
    context: Option<EvalContext>,
    base: Record,
    static_pending: bool,
    groups: btree_map::IntoIter<String, Vec<Field>>,
    pending: VecDeque<Record>,
    malformed_groups: BTreeSet<String>,
    failed: bool,
}

impl Materialized<'_> {
    /// Groups dropped so far because their id did not split into the expected components.
    pub fn malformed_groups(&self) -> &BTreeSet<String> {
        &self.malformed_groups
    }

    fn group_candidate(&mut self, group: String, fields: Vec<Field>) -> Option<Record> {
        let plan = self.plan;
        let layout = plan.schema().dynamic_layout()?;
        let Some(components) = layout.split(&group) else {
            self.malformed_groups.insert(group.clone());
            return None;
        };
        let mut candidate = self.base.duplicate();
        for (name, value) in layout.parts.iter().zip(components) {
            if name == SKIP_COMPONENT {
                continue;
            }
            candidate.push_key_field(
                Field::row_key(name, value, FieldType::String).in_group(group.as_str()),
            );
        }
        for field in fields {
            candidate.insert_column(field);
        }
        Some(candidate)
    }

    fn accepts(&mut self, candidate: &Record) -> bool {
        let truth = match (self.plan.predicate(), self.context.as_mut()) {
            (Some(predicate), Some(context)) => context.evaluate(predicate, candidate, Stage::Full),
            _ => Truth::True,
        };
        truth.is_true() && self.plan.has_selected_value(candidate)
    }

    fn fan_out(&self, mut record: Record) -> Result<Vec<Record>, Error> {
        let plan = self.plan;
        record.retain_columns(|field| plan.is_selected(&field.family, &field.name));
        let mut out = vec![record];
        for document in plan.documents() {
            let mut next = Vec::with_capacity(out.len());
            for record in out {
                next.extend(expand_document(record, document)?);
            }
            out = next;
        }
        Ok(out)
    }
}

impl Iterator for Materialized<'_> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.failed {
                return None;
            }
            let candidate = if self.static_pending {
                self.static_pending = false;
                Some(self.base.duplicate())
            } else {
                let (group, fields) = self.groups.next()?;
                self.group_candidate(group, fields)
            };
            let Some(candidate) = candidate else {
                continue;
            };
            if !self.accepts(&candidate) {
                continue;
            }
            match self.fan_out(candidate) {
                Ok(records) => self.pending.extend(records),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn expand_document(mut record: Record, document: &DocumentSpec) -> Result<Vec<Record>, Error> {
    let raw = match record.column(&document.family, &document.name) {
        Some(Field { value: Some(raw), .. }) => raw.clone(),
        _ => return Ok(vec![record]),
    };
    let Some(column) = record.remove_column(&document.family, &document.name) else {
        return Ok(vec![record]);
    };
    let rows = flatten_document(&raw, document)?;
    if rows.is_empty() {
        return Ok(vec![record]);
    }
    Ok(rows
        .into_iter()
        .map(|row| {
            let mut variant = record.duplicate();
            for flat in row {
                variant.insert_column(Field {
                    family: column.family.clone(),
                    name: flat.name,
                    value: flat.value,
                    field_type: FieldType::String,
                    origin: column.origin,
                    group_id: column.group_id.clone(),
                });
            }
            variant
        })
        .collect())
}

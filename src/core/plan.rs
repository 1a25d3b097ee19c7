//! Purpose: Freeze schema, selection, predicate and flattening rules into one job plan.
//! Exports: `PlanBuilder`, `JobPlan`, `DocumentSpec`.
//! Role: Last validation gate before any row is read; derives the column sets the
//!       reconciler needs (required families, static and dynamic requirements).
//! Invariants: A built `JobPlan` is immutable and safe to share across partitions.
//! Invariants: Every selected or filtered column exists in the schema.
use std::collections::BTreeSet;

use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::predicate::{Condition, FieldRef, Predicate};
use crate::core::record::{FieldOrigin, Record};
use crate::core::schema::{DynamicColumnDescriptor, ResolvedSchema, StaticColumn};
use crate::core::value::FieldType;

/// Separates path segments in authorized document paths (`A>B>AB1`).
pub const DOCUMENT_PATH_SEPARATOR: &str = ">";

/// A column holding a serialized nested document that is flattened on output.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct DocumentSpec {
    pub family: String,
    pub name: String,
    /// Authorized member paths, `>`-separated from the document root.
    #[serde(default)]
    pub paths: BTreeSet<String>,
}

impl DocumentSpec {
    pub fn new(family: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            name: name.into(),
            paths: BTreeSet::new(),
        }
    }

    pub fn authorize(mut self, path: impl Into<String>) -> Self {
        self.paths.insert(path.into());
        self
    }

    pub fn is_authorized(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// True when some authorized path lies strictly below `path`.
    pub fn authorizes_below(&self, path: &str) -> bool {
        let prefix = format!("{path}{DOCUMENT_PATH_SEPARATOR}");
        self.paths
            .range(prefix.clone()..)
            .next()
            .is_some_and(|candidate| candidate.starts_with(&prefix))
    }
}

#[derive(Clone, Debug)]
pub struct JobPlan {
    schema: ResolvedSchema,
    selection: Vec<(String, String)>,
    predicate: Option<Predicate>,
    documents: Vec<DocumentSpec>,
    required_families: BTreeSet<String>,
    required_static: Vec<(String, String)>,
    required_dynamic: Vec<(String, String)>,
    selection_hides_static_filter: bool,
}

impl JobPlan {
    pub fn schema(&self) -> &ResolvedSchema {
        &self.schema
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn documents(&self) -> &[DocumentSpec] {
        &self.documents
    }

    pub fn document(&self, family: &str, name: &str) -> Option<&DocumentSpec> {
        self.documents
            .iter()
            .find(|doc| doc.family == family && doc.name == name)
    }

    pub fn required_families(&self) -> impl Iterator<Item = &str> {
        self.required_families.iter().map(String::as_str)
    }

    /// Static columns that are selected or referenced by the predicate.
    pub fn required_static_columns(&self) -> impl Iterator<Item = &StaticColumn> {
        self.required_static
            .iter()
            .filter_map(|(family, name)| self.schema.static_column(family, name))
    }

    /// Dynamic columns that are selected or referenced by the predicate.
    pub fn required_dynamic_columns(&self) -> impl Iterator<Item = &DynamicColumnDescriptor> {
        self.required_dynamic
            .iter()
            .filter_map(|(family, name)| self.schema.dynamic_column(family, name))
    }

    /// Output is purely dynamic while the filter reads static columns outside it.
    pub fn selection_hides_static_filter(&self) -> bool {
        self.selection_hides_static_filter
    }

    pub fn is_selected(&self, family: &str, name: &str) -> bool {
        self.selection
            .iter()
            .any(|(f, n)| f == family && n == name)
    }

    pub fn has_selected_value(&self, record: &Record) -> bool {
        self.selection
            .iter()
            .any(|(family, name)| record.has_value(family, name))
    }
}

#[derive(Debug)]
pub struct PlanBuilder {
    schema: ResolvedSchema,
    selection: Vec<FieldRef>,
    condition: Option<Condition>,
    documents: Vec<DocumentSpec>,
}

impl PlanBuilder {
    pub fn new(schema: ResolvedSchema) -> Self {
        Self {
            schema,
            selection: Vec::new(),
            condition: None,
            documents: Vec::new(),
        }
    }

    pub fn select(mut self, column: FieldRef) -> Self {
        self.selection.push(column);
        self
    }

    /// Selects every static and dynamic column of the schema.
    pub fn select_all(mut self) -> Self {
        let columns: Vec<FieldRef> = self
            .schema
            .static_columns()
            .map(|c| FieldRef::column(&c.family, &c.name))
            .chain(
                self.schema
                    .dynamic_columns()
                    .map(|d| FieldRef::column(&d.family, &d.name)),
            )
            .collect();
        self.selection.extend(columns);
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn flatten(mut self, document: DocumentSpec) -> Self {
        self.documents.push(document);
        self
    }

    pub fn build(self) -> Result<JobPlan, Error> {
        let schema = self.schema;
        if self.selection.is_empty() {
            return Err(invalid("select at least one column"));
        }

        let mut selection = Vec::new();
        let mut selected_origins = BTreeSet::new();
        for column in &self.selection {
            let Some(family) = column.family.as_deref() else {
                return Err(invalid(format!(
                    "`{column}` is a row-key field; row-key fields are always emitted"
                )));
            };
            let origin = column_origin(&schema, family, &column.name)
                .ok_or_else(|| invalid(format!("unknown column `{column}`")).with_family(family))?;
            selected_origins.insert(origin);
            let entry = (family.to_string(), column.name.clone());
            if !selection.contains(&entry) {
                selection.push(entry);
            }
        }

        let predicate = self
            .condition
            .as_ref()
            .map(|condition| condition.resolve(&schema))
            .transpose()?;

        let mut required: BTreeSet<(String, String)> = selection.iter().cloned().collect();
        let mut filter_reads_unselected_static = false;
        if let Some(predicate) = &predicate {
            for leaf in predicate.leaves() {
                let Some(family) = leaf.field().family.as_deref() else {
                    continue;
                };
                let entry = (family.to_string(), leaf.field().name.clone());
                if leaf.origin() == FieldOrigin::Static && !selection.contains(&entry) {
                    filter_reads_unselected_static = true;
                }
                required.insert(entry);
            }
        }

        for document in &self.documents {
            let field_type = schema
                .static_column(&document.family, &document.name)
                .map(|c| c.field_type)
                .or_else(|| {
                    schema
                        .dynamic_column(&document.family, &document.name)
                        .map(|d| d.field_type)
                });
            if field_type != Some(FieldType::Document) {
                return Err(invalid(format!(
                    "`{}:{}` is not a document column",
                    document.family, document.name
                )));
            }
            if document.paths.iter().any(|path| {
                path.split(DOCUMENT_PATH_SEPARATOR)
                    .any(|segment| segment.is_empty())
            }) {
                return Err(invalid(format!(
                    "document `{}` has an authorized path with an empty segment",
                    document.name
                )));
            }
        }

        let mut required_static = Vec::new();
        let mut required_dynamic = Vec::new();
        for (family, name) in required.iter() {
            match column_origin(&schema, family, name) {
                Some(FieldOrigin::Static) => required_static.push((family.clone(), name.clone())),
                Some(FieldOrigin::Dynamic) => {
                    required_dynamic.push((family.clone(), name.clone()))
                }
                _ => {}
            }
        }
        let required_families = required.into_iter().map(|(family, _)| family).collect();

        let selection_hides_static_filter = selected_origins.len() == 1
            && selected_origins.contains(&FieldOrigin::Dynamic)
            && filter_reads_unselected_static;

        Ok(JobPlan {
            schema,
            selection,
            predicate,
            documents: self.documents,
            required_families,
            required_static,
            required_dynamic,
            selection_hides_static_filter,
        })
    }
}

fn column_origin(schema: &ResolvedSchema, family: &str, name: &str) -> Option<FieldOrigin> {
    if schema.static_column(family, name).is_some() {
        Some(FieldOrigin::Static)
    } else if schema.dynamic_column(family, name).is_some() {
        Some(FieldOrigin::Dynamic)
    } else {
        None
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Validation).with_message(message)
}

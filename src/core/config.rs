//! Purpose: Serde-facing job description: window settings plus the resolved schema as data.
//! Exports: `JobConfig`, `JobSpec`, `RowKeySpecData`, `RowKeyFieldData`, `StaticColumnData`,
//!          `DynamicColumnData`, `DynamicPartsData`.
//! Role: Converts JSON job files into a `JobPlan` through the staged builders.
//! Invariants: No validation lives here; every rule is enforced by the builders.
use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::{DocumentSpec, JobPlan, PlanBuilder};
use crate::core::predicate::{Condition, FieldRef};
use crate::core::rowkey::{RowKeyField, RowKeySpec};
use crate::core::schema::{DynamicColumnDescriptor, SchemaBuilder, StaticColumn};
use crate::core::source::TimeWindow;
use crate::core::value::FieldType;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    /// Raw, tombstone-aware change path; `false` reads latest values only.
    pub incremental: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            min_timestamp: 0,
            max_timestamp: u64::MAX,
            incremental: true,
        }
    }
}

impl JobConfig {
    pub fn window(&self) -> Result<TimeWindow, Error> {
        TimeWindow::new(self.min_timestamp, self.max_timestamp)
            .map_err(|err| err.with_hint("min_timestamp must not exceed max_timestamp."))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RowKeyFieldData {
    pub name: String,
    #[serde(default)]
    pub literal: Option<String>,
    #[serde(default)]
    pub hashed_bits: Option<u32>,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RowKeySpecData {
    #[serde(default)]
    pub separator: String,
    pub fields: Vec<RowKeyFieldData>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StaticColumnData {
    pub family: String,
    pub name: String,
    /// Stored qualifier when it differs from the output name.
    #[serde(default)]
    pub qualifier: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DynamicColumnData {
    pub family: String,
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DynamicPartsData {
    pub names: Vec<String>,
    #[serde(default)]
    pub separator: Option<String>,
}

/// A whole job: schema, selection, filter, flattening rules and window settings.
#[derive(Clone, Debug, Deserialize)]
pub struct JobSpec {
    pub row_key: RowKeySpecData,
    #[serde(default)]
    pub static_columns: Vec<StaticColumnData>,
    #[serde(default)]
    pub dynamic_columns: Vec<DynamicColumnData>,
    /// Layout shared by every dynamic column.
    #[serde(default)]
    pub dynamic_parts: DynamicPartsData,
    /// Output columns; empty selects everything.
    #[serde(default)]
    pub select: Vec<FieldRef>,
    #[serde(default)]
    pub filter: Option<Condition>,
    #[serde(default)]
    pub documents: Vec<DocumentSpec>,
    #[serde(default)]
    pub job: JobConfig,
}

impl JobSpec {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid job file: {err}"))
                .with_hint("Run `cellshift check --job <path>` to validate a job file.")
                .with_source(err)
        })
    }

    pub fn row_key_spec(&self) -> Result<RowKeySpec, Error> {
        let fields = self
            .row_key
            .fields
            .iter()
            .map(|field| {
                let base = match (&field.literal, field.hashed_bits) {
                    (Some(_), Some(_)) => {
                        return Err(Error::new(ErrorKind::Validation).with_message(format!(
                            "row-key field `{}` cannot be both literal and hashed",
                            field.name
                        )));
                    }
                    (Some(value), None) => RowKeyField::literal(&field.name, value),
                    (None, Some(bits)) => RowKeyField::hashed(&field.name, bits),
                    (None, None) => RowKeyField::plain(&field.name),
                };
                Ok(base.typed(field.field_type))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        RowKeySpec::new(self.row_key.separator.clone(), fields)
    }

    pub fn build_plan(&self) -> Result<JobPlan, Error> {
        let mut schema = SchemaBuilder::new(self.row_key_spec()?);
        for column in &self.static_columns {
            let mut resolved = StaticColumn::new(&column.family, &column.name, column.field_type);
            if let Some(qualifier) = &column.qualifier {
                resolved = resolved.with_qualifier(qualifier.as_bytes());
            }
            schema = schema.static_column(resolved);
        }
        for column in &self.dynamic_columns {
            schema = schema.dynamic_column(
                DynamicColumnDescriptor::new(&column.family, &column.name, column.field_type)
                    .with_prefix(&column.prefix)
                    .with_suffix(&column.suffix)
                    .with_parts(
                        self.dynamic_parts.names.iter().cloned(),
                        self.dynamic_parts.separator.as_deref(),
                    ),
            );
        }

        let mut plan = PlanBuilder::new(schema.build()?);
        plan = if self.select.is_empty() {
            plan.select_all()
        } else {
            self.select
                .iter()
                .cloned()
                .fold(plan, PlanBuilder::select)
        };
        if let Some(condition) = &self.filter {
            plan = plan.filter(condition.clone());
        }
        for document in &self.documents {
            plan = plan.flatten(document.clone());
        }
        plan.build()
    }
}

#[cfg(test)]
mod tests {
    use super::{JobConfig, JobSpec};
    use crate::core::error::ErrorKind;

    const JOB: &str = r#"{
        "row_key": {
            "separator": "|",
            "fields": [
                {"name": "salt", "hashed_bits": 4},
                {"name": "provider"},
                {"name": "fy", "type": "int"}
            ]
        },
        "static_columns": [
            {"family": "D", "name": "SR1"},
            {"family": "M", "name": "DOC", "type": "document"}
        ],
        "dynamic_columns": [{"family": "D", "name": "RC", "prefix": "RC", "type": "long"}],
        "dynamic_parts": {"names": ["line", "SKIP"], "separator": "|"},
        "select": [{"family": "D", "name": "RC"}, {"family": "M", "name": "DOC"}],
        "filter": {"and": [
            {"leaf": {"field": {"family": "D", "name": "SR1"}, "op": "=", "literal": "Y"}},
            {"leaf": {"field": {"name": "fy"}, "op": ">=", "literal": "2017"}}
        ]},
        "documents": [{"family": "M", "name": "DOC", "paths": ["A>B"]}],
        "job": {"min_timestamp": 50, "incremental": false}
    }"#;

    #[test]
    fn job_file_builds_a_plan() {
        let spec = JobSpec::from_json(JOB).unwrap();
        assert_eq!(spec.job.max_timestamp, u64::MAX);
        assert!(!spec.job.incremental);
        let plan = spec.build_plan().unwrap();
        assert_eq!(plan.schema().row_key().salt_len(), 1);
        assert!(plan.schema().has_dynamic());
        assert_eq!(plan.required_families().collect::<Vec<_>>(), vec!["D", "M"]);
        assert!(plan.document("M", "DOC").is_some());
        assert_eq!(plan.predicate().map(|p| p.leaf_count()), Some(2));
    }

    #[test]
    fn defaults_select_everything() {
        let spec = JobSpec::from_json(
            r#"{"row_key": {"fields": [{"name": "id"}]},
                "static_columns": [{"family": "D", "name": "A"}, {"family": "D", "name": "B"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.job, JobConfig::default());
        let plan = spec.build_plan().unwrap();
        assert_eq!(plan.required_static_columns().count(), 2);
    }

    #[test]
    fn builder_rules_apply_to_job_files() {
        let spec = JobSpec::from_json(
            r#"{"row_key": {"fields": [{"name": "id"}]},
                "static_columns": [{"family": "D", "name": "A", "type": "string"}],
                "filter": {"leaf": {"field": {"family": "D", "name": "A"}, "op": "<", "literal": "x"}}}"#,
        )
        .unwrap();
        assert_eq!(spec.build_plan().unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(JobSpec::from_json("{}").unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn inverted_window_is_a_usage_error() {
        let config = JobConfig {
            min_timestamp: 10,
            max_timestamp: 5,
            incremental: true,
        };
        let err = config.window().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.hint().is_some());
    }
}

//! Purpose: Logical fields and the normalized record handed to sink adapters.
//! Exports: `Field`, `FieldOrigin`, `Record`.
//! Role: Shared value model between materialization, predicate evaluation and sinks.
//! Invariants: Records are read-only outside the crate; the engine never touches one after emission.
//! Invariants: `group_id` is empty for row-key and static fields.
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::value::FieldType;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    RowKey,
    Static,
    Dynamic,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub family: String,
    pub name: String,
    pub value: Option<String>,
    pub field_type: FieldType,
    pub origin: FieldOrigin,
    pub group_id: String,
}

impl Field {
    pub fn row_key(name: impl Into<String>, value: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            family: String::new(),
            name: name.into(),
            value: Some(value.into()),
            field_type,
            origin: FieldOrigin::RowKey,
            group_id: String::new(),
        }
    }

    pub fn column(
        family: impl Into<String>,
        name: impl Into<String>,
        value: Option<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            family: family.into(),
            name: name.into(),
            value,
            field_type,
            origin: FieldOrigin::Static,
            group_id: String::new(),
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.origin = FieldOrigin::Dynamic;
        self.group_id = group_id.into();
        self
    }

    pub fn is_key(&self) -> bool {
        self.family.is_empty()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Record {
    row_key: Vec<Field>,
    columns: BTreeMap<String, BTreeMap<String, Field>>,
}

impl Record {
    pub fn new(row_key: Vec<Field>) -> Self {
        Self {
            row_key,
            columns: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, field: Field) -> Self {
        self.insert_column(field);
        self
    }

    /// Deep, independent copy used as the base of per-group variants.
    pub fn duplicate(&self) -> Record {
        self.clone()
    }

    pub fn row_key(&self) -> &[Field] {
        &self.row_key
    }

    pub fn key_field(&self, name: &str) -> Option<&Field> {
        self.row_key.iter().find(|field| field.name == name)
    }

    pub fn column(&self, family: &str, name: &str) -> Option<&Field> {
        self.columns.get(family)?.get(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Field> {
        self.columns.values().flat_map(|names| names.values())
    }

    pub fn column_count(&self) -> usize {
        self.columns.values().map(BTreeMap::len).sum()
    }

    /// Resolves a key field (`family == None`) or a column.
    pub fn lookup(&self, family: Option<&str>, name: &str) -> Option<&Field> {
        match family {
            None => self.key_field(name),
            Some(family) => self.column(family, name),
        }
    }

    pub fn has_value(&self, family: &str, name: &str) -> bool {
        self.column(family, name)
            .is_some_and(|field| field.value.is_some())
    }

    pub(crate) fn push_key_field(&mut self, field: Field) {
        self.row_key.push(field);
    }

    pub(crate) fn insert_column(&mut self, field: Field) {
        self.columns
            .entry(field.family.clone())
            .or_default()
            .insert(field.name.clone(), field);
    }

    pub(crate) fn remove_column(&mut self, family: &str, name: &str) -> Option<Field> {
        let names = self.columns.get_mut(family)?;
        let removed = names.remove(name);
        if names.is_empty() {
            self.columns.remove(family);
        }
        removed
    }

    pub(crate) fn retain_columns(&mut self, mut keep: impl FnMut(&Field) -> bool) {
        for names in self.columns.values_mut() {
            names.retain(|_, field| keep(field));
        }
        self.columns.retain(|_, names| !names.is_empty());
    }

    /// `{"key": {..}, "columns": {family: {name: value}}}` with nulls preserved.
    pub fn to_json(&self) -> Value {
        let mut key = Map::new();
        for field in &self.row_key {
            key.insert(field.name.clone(), json_value(field));
        }
        let mut families = Map::new();
        for (family, names) in &self.columns {
            let mut inner = Map::new();
            for (name, field) in names {
                inner.insert(name.clone(), json_value(field));
            }
            families.insert(family.clone(), Value::Object(inner));
        }
        let mut outer = Map::new();
        outer.insert("key".to_string(), Value::Object(key));
        outer.insert("columns".to_string(), Value::Object(families));
        Value::Object(outer)
    }
}

fn json_value(field: &Field) -> Value {
    match &field.value {
        Some(value) => Value::String(value.clone()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::{Field, FieldOrigin, Record};
    use crate::core::value::FieldType;
    use serde_json::json;

    fn base() -> Record {
        Record::new(vec![Field::row_key("provider", "S", FieldType::String)]).with_column(
            Field::column("D", "SR1", Some("Y".to_string()), FieldType::String),
        )
    }

    #[test]
    fn duplicate_is_independent() {
        let original = base();
        let mut copy = original.duplicate();
        copy.insert_column(
            Field::column("D", "RC", Some("10".to_string()), FieldType::Int).in_group("S|2017"),
        );
        copy.push_key_field(Field::row_key("fy", "2017", FieldType::String));

        assert_eq!(original.column_count(), 1);
        assert_eq!(original.row_key().len(), 1);
        assert_eq!(copy.column_count(), 2);
        assert_eq!(copy.column("D", "RC").map(|f| f.origin), Some(FieldOrigin::Dynamic));
    }

    #[test]
    fn lookup_distinguishes_keys_from_columns() {
        let record = base();
        assert!(record.lookup(None, "provider").is_some());
        assert!(record.lookup(Some("D"), "provider").is_none());
        assert!(record.lookup(Some("D"), "SR1").is_some());
    }

    #[test]
    fn remove_column_drops_empty_family() {
        let mut record = base();
        assert!(record.remove_column("D", "SR1").is_some());
        assert_eq!(record.to_json(), json!({"key": {"provider": "S"}, "columns": {}}));
    }
}

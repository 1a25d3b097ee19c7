//! Purpose: Flatten a serialized nested document into zero or more flat field rows.
//! Exports: `FlatField`, `FlatRow`, `flatten_document`, `cartesian`.
//! Role: Pure fan-out helper used by the materializer after a record passes the filter.
//! Invariants: Nested members are included only when their path is explicitly authorized.
//! Invariants: Sibling arrays combine by cartesian product; each output row holds one
//!             element of every array.
//! Invariants: `Ok(vec![])` means "nothing matched"; `Err` means the document is malformed.
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::{DOCUMENT_PATH_SEPARATOR, DocumentSpec};

/// Joins path segments into output field names (`A>B>AB1` becomes `A_B_AB1`).
pub const FLAT_NAME_SEPARATOR: &str = "_";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlatField {
    pub name: String,
    pub value: Option<String>,
}

pub type FlatRow = Vec<FlatField>;

pub fn flatten_document(raw: &str, spec: &DocumentSpec) -> Result<Vec<FlatRow>, Error> {
    let document: Value = serde_json::from_str(raw).map_err(|err| {
        malformed(spec, "document is not valid JSON").with_source(err)
    })?;
    let Value::Object(root) = document else {
        return Err(malformed(spec, "document root is not an object"));
    };
    walk(&root, &[], spec)
}

/// Every combination of one row from `left` with one row from `right`.
pub fn cartesian(left: &[FlatRow], right: &[FlatRow]) -> Vec<FlatRow> {
    left.iter()
        .flat_map(|l| {
            right.iter().map(move |r| {
                let mut row = l.clone();
                row.extend(r.iter().cloned());
                row
            })
        })
        .collect()
}

fn walk(object: &Map<String, Value>, parent: &[&str], spec: &DocumentSpec) -> Result<Vec<FlatRow>, Error> {
    let mut scalars = FlatRow::new();
    let mut nested: Vec<Vec<FlatRow>> = Vec::new();
    let mut deferred: Vec<Vec<FlatRow>> = Vec::new();

    for (key, member) in object {
        let mut path = parent.to_vec();
        path.push(key.as_str());
        let joined = path.join(DOCUMENT_PATH_SEPARATOR);

        match member {
            Value::Object(child) => {
                if spec.authorizes_below(&joined) {
                    let rows = walk(child, &path, spec)?;
                    if !rows.is_empty() {
                        nested.push(rows);
                    }
                }
            }
            Value::Array(items) => {
                let rows = walk_array(items, &path, &joined, spec)?;
                if !rows.is_empty() {
                    deferred.push(rows);
                }
            }
            scalar => {
                if member_included(parent, &joined, spec) {
                    scalars.push(flat_field(&path, scalar));
                }
            }
        }
    }

    let mut combos = vec![scalars];
    for rows in nested.iter().chain(deferred.iter()) {
        combos = cartesian(&combos, rows);
    }
    if combos.len() == 1 && combos[0].is_empty() {
        return Ok(Vec::new());
    }
    Ok(combos)
}

fn walk_array(
    items: &[Value],
    path: &[&str],
    joined: &str,
    spec: &DocumentSpec,
) -> Result<Vec<FlatRow>, Error> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    if items.iter().all(Value::is_object) {
        if !spec.authorizes_below(joined) {
            return Ok(Vec::new());
        }
        let mut rows = Vec::new();
        for item in items {
            if let Value::Object(element) = item {
                rows.extend(walk(element, path, spec)?);
            }
        }
        return Ok(rows);
    }
    if items.iter().all(|item| !item.is_object() && !item.is_array()) {
        // each scalar acts as a one-member object keyed by the array's own name
        let parent = &path[..path.len() - 1];
        if !member_included(parent, joined, spec) {
            return Ok(Vec::new());
        }
        return Ok(items.iter().map(|item| vec![flat_field(path, item)]).collect());
    }
    Err(malformed(spec, format!("array `{joined}` mixes objects, arrays and scalars")))
}

// Root members are implicit; anything deeper needs an explicit authorization.
fn member_included(parent: &[&str], joined: &str, spec: &DocumentSpec) -> bool {
    parent.is_empty() || spec.is_authorized(joined)
}

fn flat_field(path: &[&str], value: &Value) -> FlatField {
    let value = match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    };
    FlatField {
        name: path.join(FLAT_NAME_SEPARATOR),
        value,
    }
}

fn malformed(spec: &DocumentSpec, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedDocument)
        .with_message(format!("{}: {}", spec.name, message.into()))
        .with_family(&spec.family)
}

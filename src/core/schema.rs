//! Purpose: Resolved static/dynamic column schema and qualifier classification.
//! Exports: `SchemaBuilder`, `ResolvedSchema`, `StaticColumn`, `DynamicColumnDescriptor`,
//!          `DynamicLayout`, `Classification`, `unrecognized_column`.
//! Role: Staged builder (collect -> validate -> freeze) feeding an immutable schema value.
//! Invariants: Classification picks the strictly-longest static prefix/suffix; first wins ties.
//! Invariants: Every dynamic descriptor shares one dynamic-part layout.
//! Invariants: Unrecognized qualifiers, including dynamic parts that are not UTF-8, are
//!             reported as `None`, never as an error.
use std::collections::BTreeMap;

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::rowkey::RowKeySpec;
use crate::core::value::FieldType;

/// Component name that is parsed but dropped from output.
pub const SKIP_COMPONENT: &str = "SKIP";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StaticColumn {
    pub family: String,
    pub qualifier: Vec<u8>,
    pub name: String,
    pub field_type: FieldType,
}

impl StaticColumn {
    /// Column whose output name equals its qualifier.
    pub fn new(family: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            family: family.into(),
            qualifier: name.as_bytes().to_vec(),
            name,
            field_type,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<Vec<u8>>) -> Self {
        self.qualifier = qualifier.into();
        self
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DynamicLayout {
    pub parts: Vec<String>,
    pub separator: Option<String>,
}

impl DynamicLayout {
    /// Splits a group id into exactly `parts.len()` components, or `None`.
    pub fn split<'a>(&self, group_id: &'a str) -> Option<Vec<&'a str>> {
        let components: Vec<&str> = match self.separator.as_deref() {
            Some(separator) if !separator.is_empty() => group_id.split(separator).collect(),
            _ => vec![group_id],
        };
        (components.len() == self.parts.len()).then_some(components)
    }

    /// Like `split`, but reports a mismatch as a `MalformedGroup` error.
    pub fn components<'a>(&self, group_id: &'a str) -> Result<Vec<&'a str>, Error> {
        self.split(group_id).ok_or_else(|| self.malformed(group_id))
    }

    pub fn malformed(&self, group_id: &str) -> Error {
        Error::new(ErrorKind::MalformedGroup).with_message(format!(
            "dynamic group `{group_id}` does not split into {} components",
            self.parts.len()
        ))
    }

    pub fn joins(&self, components: &[&str]) -> String {
        components.join(self.separator.as_deref().unwrap_or(""))
    }

    /// Component names that survive into output (everything but `SKIP`).
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .map(String::as_str)
            .filter(|name| *name != SKIP_COMPONENT)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DynamicColumnDescriptor {
    pub family: String,
    pub name: String,
    /// Empty means "no static prefix".
    pub prefix: String,
    /// Empty means "no static suffix".
    pub suffix: String,
    pub layout: DynamicLayout,
    pub field_type: FieldType,
}

impl DynamicColumnDescriptor {
    pub fn new(family: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            family: family.into(),
            name: name.into(),
            prefix: String::new(),
            suffix: String::new(),
            layout: DynamicLayout::default(),
            field_type,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_parts<I, S>(mut self, parts: I, separator: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layout = DynamicLayout {
            parts: parts.into_iter().map(Into::into).collect(),
            separator: separator.map(str::to_string),
        };
        self
    }

    fn has_static_part(&self) -> bool {
        !self.prefix.is_empty() || !self.suffix.is_empty()
    }

    /// Qualifier holding `dynamic_part` under this descriptor.
    pub fn qualifier_for(&self, dynamic_part: &str) -> Vec<u8> {
        let mut qualifier =
            Vec::with_capacity(self.prefix.len() + dynamic_part.len() + self.suffix.len());
        qualifier.extend_from_slice(self.prefix.as_bytes());
        qualifier.extend_from_slice(dynamic_part.as_bytes());
        qualifier.extend_from_slice(self.suffix.as_bytes());
        qualifier
    }

    fn dynamic_part<'q>(&self, qualifier: &'q [u8]) -> &'q [u8] {
        if !self.prefix.is_empty() {
            &qualifier[self.prefix.len()..]
        } else if !self.suffix.is_empty() {
            &qualifier[..qualifier.len() - self.suffix.len()]
        } else {
            qualifier
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Classification<'a> {
    Static(&'a StaticColumn),
    Dynamic {
        descriptor: &'a DynamicColumnDescriptor,
        dynamic_part: String,
    },
}

impl Classification<'_> {
    /// Fan-out key: empty for static columns.
    pub fn group_id(&self) -> &str {
        match self {
            Classification::Static(_) => "",
            Classification::Dynamic { dynamic_part, .. } => dynamic_part,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedSchema {
    row_key: RowKeySpec,
    statics: BTreeMap<String, Vec<StaticColumn>>,
    dynamics: BTreeMap<String, Vec<DynamicColumnDescriptor>>,
    layout: Option<DynamicLayout>,
}

impl ResolvedSchema {
    pub fn row_key(&self) -> &RowKeySpec {
        &self.row_key
    }

    pub fn has_dynamic(&self) -> bool {
        self.layout.is_some()
    }

    pub fn dynamic_layout(&self) -> Option<&DynamicLayout> {
        self.layout.as_ref()
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        let mut families: Vec<&str> = self
            .statics
            .keys()
            .chain(self.dynamics.keys())
            .map(String::as_str)
            .collect();
        families.sort_unstable();
        families.dedup();
        families.into_iter()
    }

    pub fn static_columns(&self) -> impl Iterator<Item = &StaticColumn> {
        self.statics.values().flatten()
    }

    pub fn dynamic_columns(&self) -> impl Iterator<Item = &DynamicColumnDescriptor> {
        self.dynamics.values().flatten()
    }

    pub fn static_column(&self, family: &str, name: &str) -> Option<&StaticColumn> {
        self.statics
            .get(family)?
            .iter()
            .find(|column| column.name == name)
    }

    pub fn dynamic_column(&self, family: &str, name: &str) -> Option<&DynamicColumnDescriptor> {
        self.dynamics
            .get(family)?
            .iter()
            .find(|descriptor| descriptor.name == name)
    }

    /// Classifies a stored column as static or dynamic; `None` when nothing matches.
    pub fn classify(&self, family: &str, qualifier: &[u8]) -> Option<Classification<'_>> {
        if let Some(column) = self
            .statics
            .get(family)
            .and_then(|columns| columns.iter().find(|c| c.qualifier == qualifier))
        {
            return Some(Classification::Static(column));
        }

        let descriptors = self.dynamics.get(family).map(Vec::as_slice).unwrap_or(&[]);
        let mut best: Option<(&DynamicColumnDescriptor, usize)> = None;
        for descriptor in descriptors.iter().filter(|d| d.suffix.is_empty()) {
            let len = descriptor.prefix.len();
            let matched = if descriptor.prefix.is_empty() {
                !qualifier.is_empty()
            } else {
                qualifier.len() > len && qualifier.starts_with(descriptor.prefix.as_bytes())
            };
            if matched && best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((descriptor, len));
            }
        }
        for descriptor in descriptors.iter().filter(|d| !d.suffix.is_empty()) {
            let len = descriptor.suffix.len();
            let matched =
                qualifier.len() > len && qualifier.ends_with(descriptor.suffix.as_bytes());
            if matched && best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((descriptor, len));
            }
        }

        // group ids are rebuilt into qualifiers, so the dynamic part must round-trip exactly
        let (descriptor, _) = best?;
        let dynamic_part = descriptor.dynamic_part(qualifier).to_str().ok()?;
        Some(Classification::Dynamic {
            descriptor,
            dynamic_part: dynamic_part.to_string(),
        })
    }
}

/// Diagnostic for a cell that matches no descriptor; logged by the caller, never returned.
pub fn unrecognized_column(family: &str, qualifier: &[u8]) -> Error {
    Error::new(ErrorKind::Schema)
        .with_message("column matches no static or dynamic descriptor; cell dropped")
        .with_family(family)
        .with_qualifier(qualifier)
}

/// Collects schema parts, then validates and freezes them into a `ResolvedSchema`.
#[derive(Debug)]
pub struct SchemaBuilder {
    row_key: RowKeySpec,
    statics: Vec<StaticColumn>,
    dynamics: Vec<DynamicColumnDescriptor>,
}

impl SchemaBuilder {
    pub fn new(row_key: RowKeySpec) -> Self {
        Self {
            row_key,
            statics: Vec::new(),
            dynamics: Vec::new(),
        }
    }

    pub fn static_column(mut self, column: StaticColumn) -> Self {
        self.statics.push(column);
        self
    }

    pub fn dynamic_column(mut self, descriptor: DynamicColumnDescriptor) -> Self {
        self.dynamics.push(descriptor);
        self
    }

    pub fn build(self) -> Result<ResolvedSchema, Error> {
        let mut statics: BTreeMap<String, Vec<StaticColumn>> = BTreeMap::new();
        for column in self.statics {
            if column.family.is_empty() || column.name.is_empty() {
                return Err(invalid("static column needs a family and a name"));
            }
            let siblings = statics.entry(column.family.clone()).or_default();
            if siblings.iter().any(|other| other.qualifier == column.qualifier) {
                return Err(invalid(format!(
                    "duplicate static qualifier `{}`",
                    column.qualifier.to_str_lossy()
                ))
                .with_family(&column.family));
            }
            if siblings.iter().any(|other| other.name == column.name) {
                return Err(invalid(format!("duplicate column name `{}`", column.name))
                    .with_family(&column.family));
            }
            siblings.push(column);
        }

        let mut layout: Option<DynamicLayout> = None;
        let mut dynamics: BTreeMap<String, Vec<DynamicColumnDescriptor>> = BTreeMap::new();
        for descriptor in self.dynamics {
            validate_descriptor(&descriptor)?;
            match &layout {
                Some(shared) if *shared != descriptor.layout => {
                    return Err(invalid(format!(
                        "dynamic column `{}` uses a different dynamic-part layout",
                        descriptor.name
                    ))
                    .with_family(&descriptor.family));
                }
                Some(_) => {}
                None => layout = Some(descriptor.layout.clone()),
            }
            let name_taken = statics
                .get(&descriptor.family)
                .is_some_and(|columns| columns.iter().any(|c| c.name == descriptor.name));
            let siblings = dynamics.entry(descriptor.family.clone()).or_default();
            if name_taken || siblings.iter().any(|other| other.name == descriptor.name) {
                return Err(invalid(format!("duplicate column name `{}`", descriptor.name))
                    .with_family(&descriptor.family));
            }
            if !descriptor.has_static_part() && siblings.iter().any(|d| !d.has_static_part()) {
                return Err(invalid("only one dynamic column per family may omit prefix and suffix")
                    .with_family(&descriptor.family));
            }
            siblings.push(descriptor);
        }

        if let Some(layout) = &layout {
            for name in layout.output_names() {
                if self.row_key.field(name).is_some() {
                    return Err(invalid(format!(
                        "dynamic-part component `{name}` collides with a row-key field"
                    )));
                }
            }
        }

        Ok(ResolvedSchema {
            row_key: self.row_key,
            statics,
            dynamics,
            layout,
        })
    }
}

fn validate_descriptor(descriptor: &DynamicColumnDescriptor) -> Result<(), Error> {
    if descriptor.family.is_empty() || descriptor.name.is_empty() {
        return Err(invalid("dynamic column needs a family and a name"));
    }
    if !descriptor.prefix.is_empty() && !descriptor.suffix.is_empty() {
        return Err(invalid(format!(
            "dynamic column `{}` may set a prefix or a suffix, not both",
            descriptor.name
        ))
        .with_family(&descriptor.family));
    }
    let layout = &descriptor.layout;
    if layout.parts.is_empty() {
        return Err(invalid(format!(
            "dynamic column `{}` names no dynamic-part components",
            descriptor.name
        )));
    }
    if layout.parts.len() > 1 && layout.separator.as_deref().is_none_or(str::is_empty) {
        return Err(invalid(format!(
            "dynamic column `{}` has {} components but no separator",
            descriptor.name,
            layout.parts.len()
        )));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Validation).with_message(message)
}

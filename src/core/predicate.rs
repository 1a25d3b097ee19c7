//! Purpose: Three-valued filter predicate with staged (row-key, static, full) evaluation.
//! Exports: `Condition`, `FieldRef`, `Operator`, `Predicate`, `Leaf`, `Truth`, `Stage`,
//!          `EvalContext`.
//! Role: `Condition` is the unresolved tree handed over by the parsing side; `resolve`
//!       validates it against a schema and freezes it into a `Predicate`.
//! Invariants: Validation failures happen in `resolve`, never during row evaluation.
//! Invariants: Leaves whose origin a stage cannot see yield `Unknown` without being consulted.
//! Invariants: Memoized leaf results live in an `EvalContext`, never on the tree itself.
use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::{FieldOrigin, Record};
use crate::core::schema::ResolvedSchema;
use crate::core::value::{FieldType, TypedValue};

/// Literal that stands for "field is absent".
pub const NULL_LITERAL: &str = "null";

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub struct FieldRef {
    /// `None` addresses row-key fields (including dynamic-part components).
    #[serde(default)]
    pub family: Option<String>,
    pub name: String,
}

impl FieldRef {
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            family: None,
            name: name.into(),
        }
    }

    pub fn column(family: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            family: Some(family.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.family {
            Some(family) => write!(f, "{family}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=", alias = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "REGEXP")]
    Regexp,
    #[serde(rename = "NOT REGEXP")]
    NotRegexp,
}

impl Operator {
    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge)
    }

    pub fn is_pattern(self) -> bool {
        matches!(self, Operator::Regexp | Operator::NotRegexp)
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Regexp | Operator::NotRegexp => false,
        }
    }
}

/// Unresolved condition tree, as produced by the predicate parser.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Leaf {
        field: FieldRef,
        op: Operator,
        literal: String,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn leaf(field: FieldRef, op: Operator, literal: impl Into<String>) -> Self {
        Condition::Leaf {
            field,
            op,
            literal: literal.into(),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Validates every leaf against `schema` and freezes the tree.
    pub fn resolve(&self, schema: &ResolvedSchema) -> Result<Predicate, Error> {
        let mut next_id = 0;
        self.resolve_with(schema, &mut next_id)
    }

    fn resolve_with(&self, schema: &ResolvedSchema, next_id: &mut usize) -> Result<Predicate, Error> {
        match self {
            Condition::Leaf { field, op, literal } => {
                let leaf = Leaf::resolve(*next_id, field, *op, literal, schema)?;
                *next_id += 1;
                Ok(Predicate::Leaf(leaf))
            }
            Condition::And(left, right) => Ok(Predicate::And(
                Box::new(left.resolve_with(schema, next_id)?),
                Box::new(right.resolve_with(schema, next_id)?),
            )),
            Condition::Or(left, right) => Ok(Predicate::Or(
                Box::new(left.resolve_with(schema, next_id)?),
                Box::new(right.resolve_with(schema, next_id)?),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn is_false(self) -> bool {
        self == Truth::False
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    RowKeyOnly,
    StaticAndRowKey,
    Full,
}

impl Stage {
    pub fn resolves(self, origin: FieldOrigin) -> bool {
        match self {
            Stage::RowKeyOnly => origin == FieldOrigin::RowKey,
            Stage::StaticAndRowKey => origin != FieldOrigin::Dynamic,
            Stage::Full => true,
        }
    }
}

#[derive(Clone, Debug)]
enum Matcher {
    Null,
    Pattern(Regex),
    Value(TypedValue),
}

#[derive(Clone, Debug)]
pub struct Leaf {
    id: usize,
    field: FieldRef,
    origin: FieldOrigin,
    field_type: FieldType,
    op: Operator,
    literal: String,
    matcher: Matcher,
}

impl Leaf {
    fn resolve(
        id: usize,
        field: &FieldRef,
        op: Operator,
        literal: &str,
        schema: &ResolvedSchema,
    ) -> Result<Self, Error> {
        let (origin, field_type) = resolve_field(field, schema)?;
        let is_null = literal.eq_ignore_ascii_case(NULL_LITERAL);

        let matcher = if op.is_pattern() {
            let pattern = Regex::new(&format!("^(?:{literal})$")).map_err(|err| {
                invalid(field, format!("invalid regular expression `{literal}`")).with_source(err)
            })?;
            Matcher::Pattern(pattern)
        } else if op.is_ordering() && !field_type.is_orderable() {
            return Err(invalid(
                field,
                format!("operator {op:?} needs an orderable field, `{field}` is {field_type:?}"),
            ));
        } else if is_null {
            if op.is_ordering() {
                return Err(invalid(field, format!("operator {op:?} cannot compare with null")));
            }
            Matcher::Null
        } else {
            let value = field_type
                .parse(literal)
                .map_err(|err| invalid(field, err.message().unwrap_or("bad literal").to_string()))?;
            Matcher::Value(value)
        };

        Ok(Self {
            id,
            field: field.clone(),
            origin,
            field_type,
            op,
            literal: literal.to_string(),
            matcher,
        })
    }

    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    pub fn origin(&self) -> FieldOrigin {
        self.origin
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    fn evaluate(&self, record: &Record) -> Truth {
        let value = record
            .lookup(self.field.family.as_deref(), &self.field.name)
            .and_then(|field| field.value.as_deref());
        match (value, &self.matcher) {
            (None, Matcher::Null) => Truth::from(self.op == Operator::Eq),
            (None, _) => Truth::False,
            (Some(_), Matcher::Null) => Truth::from(self.op == Operator::Ne),
            (Some(raw), Matcher::Pattern(pattern)) => {
                Truth::from(pattern.is_match(raw) == (self.op == Operator::Regexp))
            }
            (Some(raw), Matcher::Value(literal)) => match self.field_type.parse(raw) {
                Ok(parsed) => parsed
                    .compare(literal)
                    .map_or(Truth::False, |ordering| Truth::from(self.op.accepts(ordering))),
                Err(_) => {
                    tracing::debug!(field = %self.field, value = raw, "value does not parse as declared type");
                    Truth::False
                }
            },
        }
    }
}

fn resolve_field(field: &FieldRef, schema: &ResolvedSchema) -> Result<(FieldOrigin, FieldType), Error> {
    match &field.family {
        None => {
            if let Some(key) = schema.row_key().field(&field.name) {
                return Ok((FieldOrigin::RowKey, key.field_type));
            }
            let is_component = schema
                .dynamic_layout()
                .is_some_and(|layout| layout.output_names().any(|name| name == field.name));
            if is_component {
                return Ok((FieldOrigin::Dynamic, FieldType::String));
            }
        }
        Some(family) => {
            if let Some(column) = schema.static_column(family, &field.name) {
                return Ok((FieldOrigin::Static, column.field_type));
            }
            if let Some(descriptor) = schema.dynamic_column(family, &field.name) {
                return Ok((FieldOrigin::Dynamic, descriptor.field_type));
            }
        }
    }
    Err(invalid(field, format!("unknown field `{field}`")))
}

fn invalid(field: &FieldRef, message: String) -> Error {
    let err = Error::new(ErrorKind::Validation).with_message(message);
    match &field.family {
        Some(family) => err.with_family(family),
        None => err,
    }
}

/// Resolved condition tree.
#[derive(Clone, Debug)]
pub enum Predicate {
    Leaf(Leaf),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            Predicate::Leaf(leaf) => out.push(leaf),
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Predicate::Leaf(_) => 1,
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                left.leaf_count() + right.leaf_count()
            }
        }
    }

    /// One-shot evaluation with a fresh context.
    pub fn evaluate(&self, record: &Record, stage: Stage) -> Truth {
        EvalContext::new(self).evaluate(self, record, stage)
    }
}

/// Per-row memo of leaf results. Row-key and static leaves are stable for a row, so a
/// conclusive result from an earlier stage is reused; dynamic leaves are always recomputed.
#[derive(Clone, Debug)]
pub struct EvalContext {
    memo: Vec<Option<Truth>>,
}

impl EvalContext {
    pub fn new(predicate: &Predicate) -> Self {
        Self {
            memo: vec![None; predicate.leaf_count()],
        }
    }

    pub fn evaluate(&mut self, node: &Predicate, record: &Record, stage: Stage) -> Truth {
        match node {
            Predicate::Leaf(leaf) => self.evaluate_leaf(leaf, record, stage),
            Predicate::And(left, right) => {
                let first = self.evaluate(left, record, stage);
                if first.is_false() {
                    return Truth::False;
                }
                first.and(self.evaluate(right, record, stage))
            }
            Predicate::Or(left, right) => {
                let first = self.evaluate(left, record, stage);
                if first.is_true() {
                    return Truth::True;
                }
                first.or(self.evaluate(right, record, stage))
            }
        }
    }

    fn evaluate_leaf(&mut self, leaf: &Leaf, record: &Record, stage: Stage) -> Truth {
        if !stage.resolves(leaf.origin) {
            return Truth::Unknown;
        }
        if let Some(Some(cached)) = self.memo.get(leaf.id) {
            return *cached;
        }
        let result = leaf.evaluate(record);
        if leaf.origin != FieldOrigin::Dynamic {
            if let Some(slot) = self.memo.get_mut(leaf.id) {
                *slot = Some(result);
            }
        }
        result
    }
}

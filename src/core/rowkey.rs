//! Purpose: Parse and build encoded row keys (optional hashed salt + separated components).
//! Exports: `RowKeySpec`, `RowKeyField`, `RowKeyFieldKind`.
//! Role: First gate of every row; malformed keys are skipped, never fatal.
//! Invariants: Salt width is `ceil(bits / 8)` bytes at the front of the key.
//! Invariants: The hashed salt is never emitted as a field.
use bstr::ByteSlice;
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};
use crate::core::outcome::{Outcome, SkipReason};
use crate::core::record::Field;
use crate::core::value::FieldType;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RowKeyFieldKind {
    Plain,
    Literal(String),
    Hashed { bits: u32 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RowKeyField {
    pub name: String,
    pub kind: RowKeyFieldKind,
    pub field_type: FieldType,
}

impl RowKeyField {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RowKeyFieldKind::Plain,
            field_type: FieldType::String,
        }
    }

    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RowKeyFieldKind::Literal(value.into()),
            field_type: FieldType::String,
        }
    }

    pub fn hashed(name: impl Into<String>, bits: u32) -> Self {
        Self {
            name: name.into(),
            kind: RowKeyFieldKind::Hashed { bits },
            field_type: FieldType::String,
        }
    }

    pub fn typed(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RowKeySpec {
    separator: String,
    fields: Vec<RowKeyField>,
    salt_bits: u32,
}

impl RowKeySpec {
    pub fn new(separator: impl Into<String>, fields: Vec<RowKeyField>) -> Result<Self, Error> {
        let separator = separator.into();
        let mut salt_bits = 0;
        for (idx, field) in fields.iter().enumerate() {
            if fields[..idx].iter().any(|other| other.name == field.name) {
                return Err(invalid(format!("duplicate row-key field `{}`", field.name)));
            }
            if let RowKeyFieldKind::Hashed { bits } = field.kind {
                if idx != 0 {
                    return Err(invalid("only the first row-key field may be hashed"));
                }
                if bits == 0 || bits > 256 {
                    return Err(invalid(format!("hash width {bits} must be within 1..=256 bits")));
                }
                salt_bits = bits;
            }
        }
        let components = fields
            .iter()
            .filter(|field| !matches!(field.kind, RowKeyFieldKind::Hashed { .. }))
            .count();
        if components == 0 {
            return Err(invalid("row key needs at least one non-hashed field"));
        }
        if components > 1 && separator.is_empty() {
            return Err(invalid("multi-component row key needs a separator"));
        }
        Ok(Self {
            separator,
            fields,
            salt_bits,
        })
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn fields(&self) -> &[RowKeyField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&RowKeyField> {
        self.components().find(|field| field.name == name)
    }

    pub fn salt_len(&self) -> usize {
        self.salt_bits.div_ceil(8) as usize
    }

    pub fn component_count(&self) -> usize {
        self.components().count()
    }

    fn components(&self) -> impl Iterator<Item = &RowKeyField> {
        self.fields
            .iter()
            .filter(|field| !matches!(field.kind, RowKeyFieldKind::Hashed { .. }))
    }

    /// Splits an encoded key into row-key fields, or skips the row.
    pub fn parse(&self, key: &[u8]) -> Outcome<Vec<Field>> {
        let salt_len = self.salt_len();
        if key.len() <= salt_len {
            return Outcome::Skip(SkipReason::MalformedRowKey);
        }
        let Ok(body) = key[salt_len..].to_str() else {
            return Outcome::Skip(SkipReason::MalformedRowKey);
        };
        let raw: Vec<&str> = if self.separator.is_empty() {
            vec![body]
        } else {
            body.split(self.separator.as_str()).collect()
        };
        if raw.len() != self.component_count() {
            return Outcome::Skip(SkipReason::MalformedRowKey);
        }

        let mut fields = Vec::with_capacity(raw.len());
        for (component, spec) in raw.into_iter().zip(self.components()) {
            if let RowKeyFieldKind::Literal(expected) = &spec.kind {
                if component != expected.as_str() {
                    return Outcome::Skip(SkipReason::MalformedRowKey);
                }
            }
            fields.push(Field::row_key(&spec.name, component, spec.field_type));
        }
        Outcome::Ready(fields)
    }

    /// Builds an encoded key from component values (salt computed, literals checked).
    pub fn encode(&self, values: &[&str]) -> Result<Vec<u8>, Error> {
        if values.len() != self.component_count() {
            return Err(Error::new(ErrorKind::MalformedRowKey).with_message(format!(
                "expected {} row-key components, got {}",
                self.component_count(),
                values.len()
            )));
        }
        for (value, spec) in values.iter().zip(self.components()) {
            if let RowKeyFieldKind::Literal(expected) = &spec.kind {
                if *value != expected.as_str() {
                    return Err(Error::new(ErrorKind::MalformedRowKey)
                        .with_message(format!("`{}` must be `{expected}`", spec.name)));
                }
            }
            if !self.separator.is_empty() && value.contains(self.separator.as_str()) {
                return Err(Error::new(ErrorKind::MalformedRowKey).with_message(format!(
                    "component `{value}` contains the separator `{}`",
                    self.separator
                )));
            }
        }
        let joined = values.join(&self.separator);
        let mut key = self.salt(joined.as_bytes());
        key.extend_from_slice(joined.as_bytes());
        Ok(key)
    }

    fn salt(&self, body: &[u8]) -> Vec<u8> {
        let len = self.salt_len();
        if len == 0 {
            return Vec::new();
        }
        let digest = Sha256::digest(body);
        let mut salt = digest[..len].to_vec();
        let spare = len as u32 * 8 - self.salt_bits;
        if let Some(last) = salt.last_mut() {
            *last &= 0xFFu8 << spare;
        }
        salt
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Validation).with_message(message)
}

#[cfg(test)]
mod tests {
    use super::{RowKeyField, RowKeySpec};
    use crate::core::outcome::{Outcome, SkipReason};

    fn invoice_key() -> RowKeySpec {
        RowKeySpec::new(
            "|",
            vec![
                RowKeyField::plain("provider"),
                RowKeyField::plain("fy"),
                RowKeyField::plain("inum"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parses_plain_components_in_order() {
        let fields = invoice_key().parse(b"S|2017|I0001").ready().unwrap();
        let pairs: Vec<_> = fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_deref().unwrap()))
            .collect();
        assert_eq!(pairs, vec![("provider", "S"), ("fy", "2017"), ("inum", "I0001")]);
    }

    #[test]
    fn wrong_component_count_skips_row() {
        assert_eq!(
            invoice_key().parse(b"S|2017"),
            Outcome::Skip(SkipReason::MalformedRowKey)
        );
        assert_eq!(
            invoice_key().parse(b""),
            Outcome::Skip(SkipReason::MalformedRowKey)
        );
    }

    #[test]
    fn literal_mismatch_skips_row() {
        let spec = RowKeySpec::new(
            "#",
            vec![RowKeyField::literal("table", "INV"), RowKeyField::plain("id")],
        )
        .unwrap();
        assert!(spec.parse(b"INV#42").is_ready());
        assert_eq!(spec.parse(b"ORD#42"), Outcome::Skip(SkipReason::MalformedRowKey));
    }

    #[test]
    fn hashed_salt_round_trips_through_encode() {
        let spec = RowKeySpec::new(
            "|",
            vec![
                RowKeyField::hashed("salt", 12),
                RowKeyField::plain("provider"),
                RowKeyField::plain("fy"),
            ],
        )
        .unwrap();
        assert_eq!(spec.salt_len(), 2);
        let key = spec.encode(&["S", "2017"]).unwrap();
        assert_eq!(key.len(), 2 + "S|2017".len());
        assert_eq!(key[1] & 0x0F, 0);
        let fields = spec.parse(&key).ready().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].value.as_deref(), Some("2017"));
    }

    #[test]
    fn hashed_field_must_come_first() {
        let err = RowKeySpec::new(
            "|",
            vec![RowKeyField::plain("id"), RowKeyField::hashed("salt", 8)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn encode_rejects_separator_inside_component() {
        assert!(invoice_key().encode(&["S", "20|17", "I1"]).is_err());
    }
}

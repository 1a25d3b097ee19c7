//! Purpose: Crate-wide error type and the kind taxonomy used by every stage.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Single error currency; row-level recoverable skips use `Outcome` instead.
//! Invariants: Kinds are stable; exit codes never change once published.
use std::error::Error as StdError;
use std::fmt;

use bstr::ByteSlice;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Schema,
    Validation,
    MalformedRowKey,
    MalformedGroup,
    MalformedDocument,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    row_key: Option<Vec<u8>>,
    family: Option<String>,
    qualifier: Option<Vec<u8>>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            row_key: None,
            family: None,
            qualifier: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn row_key(&self) -> Option<&[u8]> {
        self.row_key.as_deref()
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn qualifier(&self) -> Option<&[u8]> {
        self.qualifier.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_row_key(mut self, row_key: impl Into<Vec<u8>>) -> Self {
        self.row_key = Some(row_key.into());
        self
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<Vec<u8>>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(row_key) = &self.row_key {
            write!(f, " (row: {})", row_key.to_str_lossy())?;
        }
        match (&self.family, &self.qualifier) {
            (Some(family), Some(qualifier)) => {
                write!(f, " (column: {family}:{})", qualifier.to_str_lossy())?
            }
            (Some(family), None) => write!(f, " (family: {family})")?,
            _ => {}
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Schema => 3,
        ErrorKind::Validation => 4,
        ErrorKind::MalformedRowKey => 5,
        ErrorKind::MalformedGroup => 6,
        ErrorKind::MalformedDocument => 7,
        ErrorKind::Io => 8,
    }
}

//! The error taxonomy from spec.md §7.
//!
//! - **`ModelErrorKind`** : the canonical set of fatal/recoverable error kinds
//! - **`ErrorContext`**   : lightweight, document-location info
//! - **`ModelError`**     : one struct that glues kind, message and context
//!
//! `MissingDataError` from the taxonomy is deliberately **not** a variant
//! here: per spec it is never raised, it surfaces as the `Missing` sentinel
//! on `FieldValue` (see `crate::value`).

use std::fmt;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The four kinds of `ModelError` that actually get raised.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModelErrorKind {
    /// Model document or configuration violates the schema or a
    /// cross-document constraint (disjointness, dangling reference).
    #[error("schema validation error")]
    SchemaValidation,
    /// A typed cast or expression detected a value the schema disallows.
    #[error("invalid data")]
    InvalidData,
    /// Configuration requests a deliberately unimplemented feature.
    #[error("not implemented")]
    NotImplemented,
    /// e.g. classifierField absent from predicted fields, non-numeric
    /// regression target, a name collision in a MiningSchema.
    #[error("configuration error")]
    RuntimeConfiguration,
    /// External collaborator failure (file/HTTP framing, persistent storage).
    #[error("I/O error")]
    Io,
}

/// Where in the model (or configuration) document an error occurred.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ErrorContext {
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Dotted path to the offending element, e.g. `"TreeModel/Node[3]/True"`.
    pub element_path: Option<String>,
}

impl ErrorContext {
    pub fn at(element_path: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            element_path: Some(element_path.into()),
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

/// The single struct carried across the whole workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: Option<String>,
    pub context: Option<ErrorContext>,
}

impl From<ModelErrorKind> for ModelError {
    fn from(kind: ModelErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: None,
        }
    }
}

impl ModelError {
    pub fn new(kind: ModelErrorKind) -> Self {
        kind.into()
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::SchemaValidation).with_message(message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::InvalidData).with_message(message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::NotImplemented).with_message(message)
    }

    pub fn runtime_configuration(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::RuntimeConfiguration).with_message(message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Io).with_message(message)
    }

    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn at(mut self, element_path: impl Into<String>) -> Self {
        self.context = Some(ErrorContext::at(element_path));
        self
    }

    /// Exit code per spec.md §6 "Exit and errors": configuration error,
    /// model-document validation error, I/O error, unrecoverable producer
    /// error, each a distinct non-zero code.
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ModelErrorKind::RuntimeConfiguration => 1,
            ModelErrorKind::SchemaValidation => 2,
            ModelErrorKind::Io => 3,
            ModelErrorKind::InvalidData | ModelErrorKind::NotImplemented => 4,
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(ctx) = &self.context {
            if let Some(path) = &ctx.element_path {
                write!(f, " at {path}")?;
            }
            if let (Some(file), Some(line)) = (&ctx.file, ctx.line) {
                write!(f, " ({file}:{line})")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ModelError {}
impl From<ModelError> for String {
    fn from(error: ModelError) -> Self {
        format!("{error}")
    }
}

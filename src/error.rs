use std::sync::PoisonError;

use thiserror::Error;

use crate::construct::ResourceKind;
use crate::datatype::Id;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodingError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("No {kind} with id {id}")]
    NotFound { kind: ResourceKind, id: Id },
    #[error("Unknown {kind} id {id}")]
    UnknownId { kind: ResourceKind, id: Id },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Parse error: {message}")]
    Parse { message: String },
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Operation aborted")]
    Aborted,
    #[error("Schema version for '{prefix}' is {found}, newest supported is {supported}")]
    SchemaVersion { prefix: String, found: i64, supported: i64 },
    #[error("Unsupported resource kind: expected {expected}, got {found}")]
    Unsupported { expected: ResourceKind, found: ResourceKind },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, CodingError>;

impl CodingError {
    /// The HTTP status a transport layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::UnknownId { .. } => 404,
            Self::Validation(_) | Self::Parse { .. } | Self::Serialization(_) | Self::Unsupported { .. } => 400,
            Self::Aborted => 504,
            _ => 500,
        }
    }
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownId { .. })
    }
}

// Helper conversions
impl From<rusqlite::Error> for CodingError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<serde_json::Error> for CodingError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}
impl From<config::ConfigError> for CodingError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<PoisonError<T>> for CodingError {
    fn from(e: PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}

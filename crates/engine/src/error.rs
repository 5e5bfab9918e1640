use tal_api::TransportError;
use tal_types::{SchemaError, SelectorError, ValueError};
use thiserror::Error;

/// Errors raised while resolving entities.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),

    #[error("{class} entity with id '{id}' not found")]
    EntityNotFound { class: String, id: String },

    #[error("No fetch method supplies fields {fields:?} of {class}")]
    NoApplicableMethod { class: String, fields: Vec<String> },

    #[error("No list method for {class} in domain '{domain}'")]
    NoSuchListMethod { class: String, domain: String },

    #[error("No search method for {class}")]
    NoSuchSearchMethod { class: String },

    #[error("Catalog has no {0} method")]
    MissingMethod(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("Malformed response from {path}: {reason}")]
    MalformedResponse { path: String, reason: String },

    #[error("{method} did not return field '{field}' for id '{id}'")]
    MissingFieldValue { method: String, field: String, id: String },

    #[error("Invalid fetch method {method}: {reason}")]
    InvalidCatalog { method: String, reason: String },

    #[error("Unknown language code '{code}'")]
    UnknownLanguage { code: String },
}

impl EngineError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_catalog(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCatalog {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

//! Domain errors raised by catalogue operations.
//!
//! Operations return `anyhow::Result`; a [`CatalogError`] inside the chain
//! tells the HTTP layer which status code to use.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The external language-model API failed or returned garbage.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl CatalogError {
    pub fn not_found(what: &str, id: i64) -> Self {
        CatalogError::NotFound(format!("{} {}", what, id))
    }
}

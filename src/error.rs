//! Service-level error taxonomy.
//!
//! Library operations called from the CLI and HTTP layers return
//! [`ServiceError`] so callers can tell bad input from missing records
//! from backend failures. Everything below this layer uses `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request is malformed (empty items, unknown mode, bad limit).
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

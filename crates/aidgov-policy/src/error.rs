use thiserror::Error;

/// Errors raised while building or loading a policy registry.
///
/// Lookups against a built registry never fail; an ungoverned field is a
/// defined default, not an error.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy load error: {0}")]
    LoadError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;

use thiserror::Error;

/// Error type shared by the governance crates.
///
/// Every variant is surfaced synchronously to the caller; nothing in the
/// core retries or swallows failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GovError {
    /// Caller input violates a precondition. No state was mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced pending change (or entity) does not exist in the
    /// expected state. No state was mutated.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity mutation failed during approval. The change stays pending.
    #[error("apply error: {0}")]
    Apply(String),

    /// Store I/O failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("actor type '{actor_type}' may not edit field '{field_name}'")]
    Forbidden {
        field_name: String,
        actor_type: String,
    },

    #[error("field '{0}' requires one-time passcode verification")]
    OtpRequired(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Entity was mutated but the status write failed. Needs reconciliation.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl GovError {
    pub fn kind(&self) -> GovErrorKind {
        match self {
            GovError::Validation(_) => GovErrorKind::Validation,
            GovError::NotFound(_) => GovErrorKind::NotFound,
            GovError::Apply(_) => GovErrorKind::Apply,
            GovError::Persistence(_) => GovErrorKind::Persistence,
            GovError::Forbidden { .. } => GovErrorKind::Forbidden,
            GovError::OtpRequired(_) => GovErrorKind::OtpRequired,
            GovError::Conflict(_) => GovErrorKind::Conflict,
            GovError::Inconsistent(_) => GovErrorKind::Inconsistent,
        }
    }
}

/// Discriminator for GovError variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GovErrorKind {
    Validation,
    NotFound,
    Apply,
    Persistence,
    Forbidden,
    OtpRequired,
    Conflict,
    Inconsistent,
}

pub type GovResult<T> = Result<T, GovError>;

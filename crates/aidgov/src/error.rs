use thiserror::Error;

/// Error type for the aidgov binary, aggregating the errors of the
/// governance crates.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("governance error: {0}")]
    Governance(#[from] aidgov_core::GovError),

    #[error("policy error: {0}")]
    Policy(#[from] aidgov_policy::PolicyError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;

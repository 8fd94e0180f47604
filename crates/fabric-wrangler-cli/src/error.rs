use fabric_wrangler_core::WranglerError;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON profile: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML profile: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid profile: {0}")]
    Profile(String),

    #[error(transparent)]
    Wrangler(#[from] WranglerError),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompareError {
    /// Credentials rejected by a code-review backend. Aborts the whole run.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Device/release manifest could not be fetched or parsed. Fatal for
    /// repository-set resolution; the message names the device and ref.
    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

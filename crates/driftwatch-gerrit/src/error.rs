use thiserror::Error;

#[derive(Debug, Error)]
pub enum GerritError {
    /// 401 from the backend. Callers must treat this as fatal for the run.
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection-level failure after retries are exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl GerritError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GerritError::NotFound(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GerritError::Auth(_))
    }
}

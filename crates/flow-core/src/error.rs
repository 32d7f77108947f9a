use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Numerics error: {0}")]
    Numerics(String),

    #[error("Non-finite value: {0}")]
    NonFinite(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("State corruption: {0}")]
    Corruption(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Transient errors allow the caller to fall back (e.g. ATR instead of
    /// GARCH); everything else is surfaced or fatal per the error design.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Numerics(_) | EngineError::InsufficientData(_)
        )
    }
}

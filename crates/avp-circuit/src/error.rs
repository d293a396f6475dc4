/// Circuit breaker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// No record exists for the source
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// Configuration rejected
    #[error("invalid circuit configuration: {0}")]
    InvalidConfig(String),
}

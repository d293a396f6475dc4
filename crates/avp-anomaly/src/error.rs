/// Anomaly engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnomalyError {
    /// Escalation policy rejected
    #[error("invalid escalation policy: {0}")]
    InvalidPolicy(String),
}

/// Side-effect delivery failure (lesson store or alerting)
///
/// Never rolls back the recorded occurrence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Collaborator could not be reached
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// Collaborator refused the payload
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// Collaborator did not answer in time
    #[error("delivery timed out after {0}ms")]
    TimedOut(u64),
}

use crate::audit::AuditError;
use crate::config::ConfigError;
use avp_circuit::CircuitError;
use avp_common::{ActionError, StoreError};
use avp_risk::AggregatorError;
use uuid::Uuid;

/// Safety gate errors
///
/// Risk outcomes are never errors. Only input problems, operator mistakes and
/// start-up failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Structurally invalid action
    #[error("invalid action: {0}")]
    InvalidAction(#[from] ActionError),

    /// Cancelled under all-or-nothing semantics
    #[error("evaluation cancelled with {outstanding} of {total} checks outstanding")]
    Cancelled {
        /// Checks that had not completed
        outstanding: usize,
        /// Enabled checks
        total: usize,
    },

    /// Decision id never issued, already resolved or expired
    #[error("unknown or expired decision: {0}")]
    UnknownDecision(Uuid),

    /// Check registration rejected
    #[error("check registration failed: {0}")]
    Registration(String),

    /// Circuit operation rejected
    #[error(transparent)]
    Circuit(#[from] CircuitError),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Durable state could not be opened or restored
    #[error("state store: {0}")]
    Store(#[from] StoreError),

    /// Audit journal could not be opened
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl GateError {
    /// Whether the error stems from caller input
    #[inline]
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidAction(_) | Self::UnknownDecision(_))
    }
}

impl From<AggregatorError> for GateError {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::InvalidAction(e) => Self::InvalidAction(e),
            AggregatorError::Cancelled { outstanding, total } => {
                Self::Cancelled { outstanding, total }
            }
            AggregatorError::InvalidCheck { .. } | AggregatorError::DuplicateCheck(_) => {
                Self::Registration(err.to_string())
            }
            AggregatorError::InvalidConfig(msg) => Self::Config(ConfigError::Invalid(msg)),
        }
    }
}

use avp_common::ActionError;

/// Risk aggregation errors
///
/// Risk outcomes are never errors; only malformed input, bad registration
/// and caller-requested all-or-nothing cancellation surface here.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregatorError {
    /// Structurally invalid action
    #[error("invalid action: {0}")]
    InvalidAction(#[from] ActionError),

    /// Check rejected at registration
    #[error("invalid check {name}: {reason}")]
    InvalidCheck {
        /// Check name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A check with the same name is already registered
    #[error("duplicate check: {0}")]
    DuplicateCheck(String),

    /// Configuration rejected
    #[error("invalid aggregator configuration: {0}")]
    InvalidConfig(String),

    /// Cancelled under all-or-nothing semantics
    #[error("evaluation cancelled with {outstanding} of {total} checks outstanding")]
    Cancelled {
        /// Checks that had not completed
        outstanding: usize,
        /// Enabled checks
        total: usize,
    },
}

impl AggregatorError {
    /// Whether the error stems from caller input
    #[inline]
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidAction(_))
    }
}

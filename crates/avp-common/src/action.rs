//! The proposed operation being gated

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Discrete action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Open or increase a long position
    Buy,
    /// Reduce or close a long position
    Sell,
    /// Open or increase a short position
    Short,
    /// Reduce or close a short position
    Cover,
}

impl ActionKind {
    /// Lower-case label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Short => "short",
            Self::Cover => "cover",
        }
    }

    /// Whether the action increases market exposure
    #[inline]
    #[must_use]
    pub fn opens_exposure(&self) -> bool {
        matches!(self, Self::Buy | Self::Short)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural problems with an [`Action`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// Identifier empty or whitespace
    #[error("action identifier is missing")]
    MissingIdentifier,

    /// Magnitude zero or negative
    #[error("action magnitude must be positive, got {0}")]
    NonPositiveMagnitude(f64),

    /// Magnitude NaN or infinite
    #[error("action magnitude is not a finite number")]
    NonFiniteMagnitude,
}

/// Proposed operation
///
/// Fields are private; once built the action is never mutated. The context
/// map is handed to every check untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    identifier: String,
    kind: ActionKind,
    magnitude: f64,
    #[serde(default)]
    context: Map<String, Value>,
}

impl Action {
    /// Create new action
    #[inline]
    #[must_use]
    pub fn new(identifier: impl Into<String>, kind: ActionKind, magnitude: f64) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            magnitude,
            context: Map::new(),
        }
    }

    /// With a context entry
    #[inline]
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// With a whole context map
    #[inline]
    #[must_use]
    pub fn with_context_map(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Identifier (e.g. symbol)
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Action kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Notional size
    #[inline]
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Pass-through context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Check structural validity
    ///
    /// # Errors
    /// - `ActionError::MissingIdentifier` if the identifier is blank
    /// - `ActionError::NonFiniteMagnitude` if the magnitude is NaN or infinite
    /// - `ActionError::NonPositiveMagnitude` if the magnitude is `<= 0`
    pub fn validate(&self) -> Result<(), ActionError> {
        if self.identifier.trim().is_empty() {
            return Err(ActionError::MissingIdentifier);
        }
        if !self.magnitude.is_finite() {
            return Err(ActionError::NonFiniteMagnitude);
        }
        if self.magnitude <= 0.0 {
            return Err(ActionError::NonPositiveMagnitude(self.magnitude));
        }
        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:.2}", self.kind, self.identifier, self.magnitude)
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete escalation level derived from recurrence
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityTier {
    /// First sightings
    #[default]
    Low,
    /// Recurring
    Medium,
    /// Sustained
    High,
    /// Requires external escalation
    Critical,
}

impl SeverityTier {
    /// Upper-case label used in logs and payloads
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// All tiers in ascending order
    #[inline]
    #[must_use]
    pub fn all() -> [SeverityTier; 4] {
        [Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

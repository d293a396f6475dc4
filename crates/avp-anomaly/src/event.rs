use avp_common::SeverityTier;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

const UNCATEGORIZED: &str = "uncategorized";

/// Stable pattern key: the normalised anomaly category
///
/// Normalisation trims, lowercases and maps whitespace and `-` to `_`, so
/// `"Order Rejected"`, `"order-rejected"` and `"order_rejected"` share a pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// Derive the pattern key from a category
    #[must_use]
    pub fn from_category(category: &str) -> Self {
        let normalised: String = category
            .trim()
            .chars()
            .map(|c| {
                if c.is_whitespace() || c == '-' {
                    '_'
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect();
        if normalised.is_empty() {
            Self(UNCATEGORIZED.to_string())
        } else {
            Self(normalised)
        }
    }

    /// Key as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PatternId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PatternId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A problem reported by a verifier or monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Free-form category; its normalised form is the pattern key
    pub category: String,
    /// Human-readable description of this occurrence
    pub description: String,
    /// Signal source implicated, if any
    #[serde(default)]
    pub source: Option<String>,
    /// Entity involved (symbol, order id, ...)
    #[serde(default)]
    pub subject: Option<String>,
    /// Severity suggested by the reporter
    #[serde(default)]
    pub reported_severity: Option<SeverityTier>,
    /// Structured details
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl AnomalyEvent {
    /// Create event
    #[must_use]
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
            source: None,
            subject: None,
            reported_severity: None,
            details: Map::new(),
        }
    }

    /// With implicated source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// With subject entity
    #[inline]
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// With reporter severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: SeverityTier) -> Self {
        self.reported_severity = Some(severity);
        self
    }

    /// With a detail entry
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Pattern this event belongs to
    #[inline]
    #[must_use]
    pub fn pattern_id(&self) -> PatternId {
        PatternId::from_category(&self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalisation_merges_spellings() {
        let a = PatternId::from_category("Order Rejected");
        let b = PatternId::from_category("  order-rejected ");
        let c = PatternId::from_category("ORDER_REJECTED");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "order_rejected");
    }

    #[test]
    fn blank_category_is_uncategorized() {
        assert_eq!(PatternId::from_category("   ").as_str(), "uncategorized");
    }

    #[test]
    fn event_builders() {
        let event = AnomalyEvent::new("fill_mismatch", "filled 90 of 100")
            .with_source("broker_positions")
            .with_subject("TSLA")
            .with_severity(SeverityTier::High)
            .with_detail("expected", 100);
        assert_eq!(event.pattern_id().as_str(), "fill_mismatch");
        assert_eq!(event.source.as_deref(), Some("broker_positions"));
        assert_eq!(event.reported_severity, Some(SeverityTier::High));
        assert_eq!(event.details.get("expected"), Some(&Value::from(100)));
    }

    #[test]
    fn pattern_id_serializes_as_plain_string() {
        let id = PatternId::from_category("price gap");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"price_gap\"");
    }
}

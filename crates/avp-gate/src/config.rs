use avp_anomaly::EscalationPolicy;
use avp_circuit::CircuitConfig;
use avp_common::SeverityTier;
use avp_risk::AggregatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete gate configuration
///
/// Every table and key is optional; omitted values take their defaults.
///
/// ```toml
/// trip_sources_at = "HIGH"
/// state_dir = "/var/lib/avp"
///
/// [circuit]
/// consecutive_failure_limit = 5
///
/// [aggregator]
/// warn_threshold = 30.0
/// block_threshold = 60.0
///
/// [escalation]
/// critical_at = 7
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Circuit breaker thresholds
    pub circuit: CircuitConfig,
    /// Aggregation thresholds and limits
    pub aggregator: AggregatorConfig,
    /// Severity tiers and delivery timeout
    pub escalation: EscalationPolicy,
    /// Pattern severity at which the reporting source's circuit is forced open
    pub trip_sources_at: SeverityTier,
    /// How long an unresolved decision stays resolvable
    pub pending_decision_ttl_secs: u64,
    /// Maximum unresolved decisions kept
    pub pending_decision_capacity: u64,
    /// Audit entries retained in memory
    pub audit_capacity: usize,
    /// Directory for durable source and pattern records
    pub state_dir: Option<PathBuf>,
    /// JSON-lines audit journal
    pub audit_journal: Option<PathBuf>,
}

impl GateConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on malformed TOML or unknown value types
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError::Read` or `ConfigError::Parse`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With durable state under `dir`
    #[inline]
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// With an audit journal file
    #[inline]
    #[must_use]
    pub fn with_audit_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_journal = Some(path.into());
        self
    }

    /// Pending decision time-to-live
    #[inline]
    #[must_use]
    pub fn pending_decision_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_decision_ttl_secs)
    }

    /// Validate every component configuration
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.aggregator
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.escalation
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.pending_decision_ttl_secs == 0 || self.pending_decision_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pending decision ttl and capacity must be positive".into(),
            ));
        }
        if self.audit_capacity == 0 {
            return Err(ConfigError::Invalid("audit_capacity must be positive".into()));
        }
        Ok(())
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            circuit: CircuitConfig::default(),
            aggregator: AggregatorConfig::default(),
            escalation: EscalationPolicy::default(),
            trip_sources_at: SeverityTier::High,
            pending_decision_ttl_secs: 86_400,
            pending_decision_capacity: 10_000,
            audit_capacity: 10_000,
            state_dir: None,
            audit_journal: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_is_default() {
        let config = GateConfig::from_toml_str("").unwrap();
        assert_eq!(config, GateConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = GateConfig::from_toml_str(
            r#"
            trip_sources_at = "CRITICAL"

            [circuit]
            consecutive_failure_limit = 3

            [aggregator]
            block_threshold = 70.0
            "#,
        )
        .unwrap();
        assert_eq!(config.trip_sources_at, SeverityTier::Critical);
        assert_eq!(config.circuit.consecutive_failure_limit, 3);
        assert_eq!(config.circuit.half_open_test_count, 3);
        assert_eq!(config.aggregator.block_threshold, 70.0);
        assert_eq!(config.aggregator.warn_threshold, 30.0);
        assert_eq!(config.escalation.critical_at, 7);
    }

    #[test]
    fn invalid_values_rejected() {
        let config = GateConfig::from_toml_str(
            r#"
            [aggregator]
            warn_threshold = 80.0
            block_threshold = 60.0
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            GateConfig::from_toml_str("trip_sources_at = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.toml");
        std::fs::write(&path, "audit_capacity = 42\n").unwrap();
        let config = GateConfig::load(&path).unwrap();
        assert_eq!(config.audit_capacity, 42);

        assert!(matches!(
            GateConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}

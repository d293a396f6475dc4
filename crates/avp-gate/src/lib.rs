//! AVP Gate - synchronous pre-execution safety gate
//!
//! [`SafetyGate`] is the single entry point callers use before any side
//! effect:
//!
//! - [`SafetyGate::evaluate`]: weighted risk decision over all enabled checks
//! - [`SafetyGate::resolve_decision`]: feed the real outcome back into the
//!   per-source circuit breakers
//! - [`SafetyGate::report_anomaly`]: recurrence tracking, lessons and escalation
//!
//! # Example
//!
//! ```rust,ignore
//! use avp_gate::{GateConfig, SafetyGate};
//!
//! let gate = SafetyGate::builder(GateConfig::load("gate.toml")?)
//!     .with_check(Arc::new(PositionReconciliation::new(broker)))
//!     .with_check(Arc::new(SimilarLosses::new(index)))
//!     .build()?;
//!
//! let decision = gate.evaluate(&action).await?;
//! if decision.approved {
//!     let fill = broker.submit(&action).await?;
//!     gate.resolve_decision(decision.decision_id, fill.realized_loss()).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod audit;
mod config;
mod error;
mod gate;

pub use audit::{AuditEntry, AuditError, AuditKind, AuditLog};
pub use config::{ConfigError, GateConfig};
pub use error::GateError;
pub use gate::{GateHealth, SafetyGate, SafetyGateBuilder};

pub use avp_anomaly::{AnomalyEvent, DailySummary, EscalationResult};
pub use avp_common::{Action, ActionKind, SeverityTier};
pub use avp_risk::{CompletionPolicy, GateDecision, RiskCheck, RiskCheckResult, Verdict};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! AVP Risk - weighted multi-check risk gate
//!
//! Runs every registered [`RiskCheck`] whose source circuit is enabled,
//! normalises their scores by weight and maps the aggregate onto a
//! three-band decision:
//!
//! | Risk score | Approved | Recommendation |
//! |------------|----------|----------------|
//! | `< warn`   | yes      | `APPROVED`     |
//! | `< block`  | yes      | `WARN` + failed checks |
//! | `>= block` | no       | `BLOCK` + failed checks |
//!
//! Checks fail soft: errors, panics and timeouts become degraded results
//! rather than aborting the evaluation.
//!
//! # Example
//!
//! ```rust,ignore
//! use avp_risk::{AggregatorConfig, RiskAggregator};
//!
//! let mut aggregator = RiskAggregator::new(AggregatorConfig::default(), circuits, clock);
//! aggregator.register(Arc::new(PositionReconciliation::new(broker)))?;
//!
//! let decision = aggregator.evaluate(&action).await?;
//! if !decision.approved {
//!     return Err(decision.recommendation.into());
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod aggregator;
mod check;
mod config;
mod decision;
mod error;

pub use aggregator::{weighted_score, CompletionPolicy, RiskAggregator};
pub use check::{CheckContext, CheckError, RiskCheck, RiskCheckResult, DEFAULT_DEGRADED_SCORE};
pub use config::AggregatorConfig;
pub use decision::{GateDecision, Verdict};
pub use error::AggregatorError;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! AVP Circuit - per-source reliability circuit breakers
//!
//! Tracks whether each upstream signal source is still accurate enough to be
//! trusted by the risk gate:
//!
//! - **Closed**: source used normally
//! - **Open**: source excluded until its cooldown elapses
//! - **HalfOpen**: source on trial again; a clean run closes it, any failure reopens it
//!
//! The Open → HalfOpen transition is evaluated lazily on the next lookup; there
//! is no background timer.
//!
//! # Example
//!
//! ```rust,ignore
//! use avp_circuit::{CircuitBreakerRegistry, CircuitConfig};
//! use avp_common::SystemClock;
//!
//! let registry = CircuitBreakerRegistry::new(CircuitConfig::default(), SystemClock::shared());
//! let report = registry.record_outcome("news_sentiment", false);
//! if !registry.is_enabled("news_sentiment") {
//!     // skip the check
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod config;
mod error;
mod registry;
mod state;

pub use config::CircuitConfig;
pub use error::CircuitError;
pub use registry::{CircuitBreakerRegistry, OutcomeReport, TransitionHook};
pub use state::{CircuitAction, CircuitState, SourceReliability, TripCause, TripReason};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

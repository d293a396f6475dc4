//! AVP Common - shared primitives for the Adaptive Verification Pipeline
//!
//! Provides the leaf types every pipeline component builds on:
//! - [`Clock`]: injected time source ([`SystemClock`], [`ManualClock`])
//! - [`Action`]: the immutable proposed operation being gated
//! - [`SeverityTier`]: discrete escalation levels
//! - [`RecordStore`]: keyed, best-effort persistence ([`MemoryStore`], [`JsonDirStore`],
//!   [`WriteBehindStore`])
//!
//! # Example
//!
//! ```rust,ignore
//! use avp_common::{Action, ActionKind, ManualClock};
//!
//! let clock = ManualClock::starting_now();
//! let action = Action::new("AAPL", ActionKind::Buy, 25_000.0)
//!     .with_context("strategy", "momentum");
//! action.validate()?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod action;
mod clock;
mod severity;
mod store;

pub use action::{Action, ActionError, ActionKind};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use severity::SeverityTier;
pub use store::{JsonDirStore, MemoryStore, RecordStore, StoreError, WriteBehindStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

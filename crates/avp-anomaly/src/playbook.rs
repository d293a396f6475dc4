//! Deterministic root-cause and prevention lookup keyed by category

use crate::event::PatternId;

/// Canned lesson content for a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybookEntry {
    /// Short lesson title
    pub title: &'static str,
    /// Most likely root cause
    pub root_cause: &'static str,
    /// Suggested prevention strategy
    pub prevention: &'static str,
}

const GENERIC: PlaybookEntry = PlaybookEntry {
    title: "Unclassified execution anomaly",
    root_cause: "Unknown; the category has no playbook entry and needs manual triage",
    prevention: "Review the anomaly details, classify the failure and add a playbook entry for the category",
};

const ENTRIES: &[(&str, PlaybookEntry)] = &[
    (
        "order_rejected",
        PlaybookEntry {
            title: "Broker rejected order",
            root_cause: "Order parameters violated broker constraints (buying power, lot size, tick size or trading halt)",
            prevention: "Validate buying power, lot size and tick size against broker rules before submission",
        },
    ),
    (
        "position_mismatch",
        PlaybookEntry {
            title: "Local position disagrees with broker",
            root_cause: "Local position cache drifted from the broker's book after an unobserved fill or manual intervention",
            prevention: "Reconcile positions against the broker before every exposure-changing order",
        },
    ),
    (
        "stale_market_data",
        PlaybookEntry {
            title: "Decision made on stale market data",
            root_cause: "Quote feed lagged or stalled and the strategy consumed an outdated price",
            prevention: "Reject signals whose quote timestamp exceeds the staleness budget",
        },
    ),
    (
        "excessive_slippage",
        PlaybookEntry {
            title: "Fill price slipped beyond tolerance",
            root_cause: "Order size too large for available liquidity or market order sent into a thin book",
            prevention: "Cap order size to a fraction of displayed depth and prefer limit orders in thin markets",
        },
    ),
    (
        "duplicate_order",
        PlaybookEntry {
            title: "Duplicate order submitted",
            root_cause: "Retry after an ambiguous timeout resubmitted an order that had already been accepted",
            prevention: "Attach idempotent client order ids and query order status before retrying",
        },
    ),
    (
        "broker_timeout",
        PlaybookEntry {
            title: "Broker API timed out",
            root_cause: "Broker endpoint degraded or network path congested",
            prevention: "Bound broker calls with timeouts, back off on repeated failures and verify order state after recovery",
        },
    ),
    (
        "risk_limit_breach",
        PlaybookEntry {
            title: "Risk limit breached",
            root_cause: "Exposure or loss limit was not enforced before the action executed",
            prevention: "Enforce position, notional and daily-loss limits in the pre-trade gate",
        },
    ),
    (
        "price_gap",
        PlaybookEntry {
            title: "Price gapped through expected range",
            root_cause: "Overnight or news-driven gap invalidated the signal's entry assumptions",
            prevention: "Re-validate entry levels at the open and widen or skip entries after large gaps",
        },
    ),
    (
        "signal_conflict",
        PlaybookEntry {
            title: "Conflicting signals acted upon",
            root_cause: "Independent signal sources disagreed and the conflict was not resolved before execution",
            prevention: "Require agreement or explicit priority between sources before acting",
        },
    ),
    (
        "fill_mismatch",
        PlaybookEntry {
            title: "Reported fill differs from order",
            root_cause: "Partial fill or broker-side amendment not reflected in local order state",
            prevention: "Track fills per execution report and reconcile filled quantity before follow-up orders",
        },
    ),
];

/// Categories with a dedicated playbook entry
pub const KNOWN_CATEGORIES: [&str; 10] = [
    "order_rejected",
    "position_mismatch",
    "stale_market_data",
    "excessive_slippage",
    "duplicate_order",
    "broker_timeout",
    "risk_limit_breach",
    "price_gap",
    "signal_conflict",
    "fill_mismatch",
];

/// Look up lesson content for a pattern, falling back to a generic entry
#[must_use]
pub fn lookup(pattern: &PatternId) -> PlaybookEntry {
    ENTRIES
        .iter()
        .find(|(key, _)| *key == pattern.as_str())
        .map_or(GENERIC, |(_, entry)| *entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_category_has_entry() {
        for category in KNOWN_CATEGORIES {
            let entry = lookup(&PatternId::from_category(category));
            assert_ne!(entry, GENERIC, "{category}");
        }
        assert_eq!(ENTRIES.len(), KNOWN_CATEGORIES.len());
    }

    #[test]
    fn lookup_uses_normalised_key() {
        let entry = lookup(&PatternId::from_category("Broker Timeout"));
        assert_eq!(entry.title, "Broker API timed out");
    }

    #[test]
    fn unknown_category_falls_back() {
        assert_eq!(lookup(&PatternId::from_category("cosmic_ray")), GENERIC);
    }
}

use std::collections::HashSet;

use crate::catalog::{Severity, SignalCatalog, SignalType, Tier};
use crate::models::{PropertyHealth, Signal};

/// Fold one parcel's signals into its health tier. Pure; no I/O and no
/// dependence on the clock, so the result is a function of the input
/// multiset alone.
///
/// Tier priority, first match wins:
/// 1. high_risk — at_risk signals of two or more distinct compounding types
/// 2. at_risk — any at_risk signal
/// 3. behind — any behind signal
/// 4. slower — any slower signal
/// 5. on_track — nothing above matched
pub fn compute_property_health(
    block_lot: &str,
    signals: &[Signal],
    catalog: &SignalCatalog,
) -> PropertyHealth {
    let at_risk_count = signals
        .iter()
        .filter(|s| s.severity == Severity::AtRisk)
        .count();

    let compounding_types: HashSet<SignalType> = signals
        .iter()
        .filter(|s| s.severity == Severity::AtRisk && catalog.is_compounding(s.signal_type))
        .map(|s| s.signal_type)
        .collect();

    let tier = if compounding_types.len() >= 2 {
        Tier::HighRisk
    } else if at_risk_count > 0 {
        Tier::AtRisk
    } else if signals.iter().any(|s| s.severity == Severity::Behind) {
        Tier::Behind
    } else if signals.iter().any(|s| s.severity == Severity::Slower) {
        Tier::Slower
    } else {
        Tier::OnTrack
    };

    PropertyHealth {
        block_lot: block_lot.to_string(),
        tier,
        signal_count: signals.len(),
        at_risk_count,
        signals: signals.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(catalog: &SignalCatalog, signal_type: SignalType) -> Signal {
        Signal {
            signal_type,
            severity: catalog.severity(signal_type),
            permit_number: None,
            block_lot: "3512/001".to_string(),
            detail: "test signal".to_string(),
        }
    }

    #[test]
    fn empty_input_is_on_track() {
        let catalog = SignalCatalog::new();
        let health = compute_property_health("3512/001", &[], &catalog);
        assert_eq!(health.tier, Tier::OnTrack);
        assert_eq!(health.signal_count, 0);
        assert_eq!(health.at_risk_count, 0);
    }

    #[test]
    fn single_compounding_signal_is_at_risk_not_high_risk() {
        let catalog = SignalCatalog::new();
        let signals = vec![signal(&catalog, SignalType::Nov)];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.tier, Tier::AtRisk);
        assert_eq!(health.at_risk_count, 1);
    }

    #[test]
    fn repeated_compounding_type_does_not_escalate() {
        let catalog = SignalCatalog::new();
        let signals = vec![
            signal(&catalog, SignalType::Nov),
            signal(&catalog, SignalType::Nov),
        ];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.tier, Tier::AtRisk);
        assert_eq!(health.at_risk_count, 2);
    }

    #[test]
    fn two_distinct_compounding_types_escalate_to_high_risk() {
        let catalog = SignalCatalog::new();
        let signals = vec![
            signal(&catalog, SignalType::Nov),
            signal(&catalog, SignalType::HoldComments),
        ];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.tier, Tier::HighRisk);
    }

    #[test]
    fn at_risk_beats_behind() {
        let catalog = SignalCatalog::new();
        let signals = vec![
            signal(&catalog, SignalType::Nov),
            signal(&catalog, SignalType::HoldStalled),
        ];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.tier, Tier::AtRisk);
    }

    #[test]
    fn behind_beats_slower() {
        let catalog = SignalCatalog::new();
        let signals = vec![
            signal(&catalog, SignalType::StaleNoActivity),
            signal(&catalog, SignalType::HoldStalled),
        ];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.tier, Tier::Behind);
    }

    #[test]
    fn slower_alone_scores_slower() {
        let catalog = SignalCatalog::new();
        let signals = vec![signal(&catalog, SignalType::ExpiredOtc)];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.tier, Tier::Slower);
    }

    #[test]
    fn output_retains_full_signal_list() {
        let catalog = SignalCatalog::new();
        let signals = vec![
            signal(&catalog, SignalType::Nov),
            signal(&catalog, SignalType::ExpiredOtc),
        ];
        let health = compute_property_health("3512/001", &signals, &catalog);
        assert_eq!(health.signal_count, 2);
        assert_eq!(health.signals.len(), 2);
        assert_eq!(health.block_lot, "3512/001");
    }
}

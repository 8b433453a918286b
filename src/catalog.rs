use serde::{Deserialize, Serialize};

/// Severity a signal carries, copied from its catalog entry at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    AtRisk,
    Behind,
    Slower,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::AtRisk => "at_risk",
            Severity::Behind => "behind",
            Severity::Slower => "slower",
        }
    }
}

/// Whether a signal calls for owner action, watchfulness, or is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actionable {
    Yes,
    Warning,
    Info,
}

impl Actionable {
    pub fn as_str(self) -> &'static str {
        match self {
            Actionable::Yes => "yes",
            Actionable::Warning => "warning",
            Actionable::Info => "info",
        }
    }
}

/// Parcel-level health tier produced by aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    OnTrack,
    Slower,
    Behind,
    AtRisk,
    HighRisk,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::OnTrack => "on_track",
            Tier::Slower => "slower",
            Tier::Behind => "behind",
            Tier::AtRisk => "at_risk",
            Tier::HighRisk => "high_risk",
        }
    }
}

/// The closed set of detector signal types. Catalog lookups are total over
/// this enum, so an unknown signal type cannot occur at runtime.
///
/// Declaration order is the fixed detector execution order and must match
/// `SignalType::ALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    HoldComments,
    HoldStalledPlanning,
    HoldStalled,
    Nov,
    Abatement,
    ExpiredUninspected,
    StaleWithActivity,
    ExpiredMinorActivity,
    ExpiredInconclusive,
    ExpiredOtc,
    StaleNoActivity,
    Complaint,
}

impl SignalType {
    pub const ALL: [SignalType; 12] = [
        SignalType::HoldComments,
        SignalType::HoldStalledPlanning,
        SignalType::HoldStalled,
        SignalType::Nov,
        SignalType::Abatement,
        SignalType::ExpiredUninspected,
        SignalType::StaleWithActivity,
        SignalType::ExpiredMinorActivity,
        SignalType::ExpiredInconclusive,
        SignalType::ExpiredOtc,
        SignalType::StaleNoActivity,
        SignalType::Complaint,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::HoldComments => "hold_comments",
            SignalType::HoldStalledPlanning => "hold_stalled_planning",
            SignalType::HoldStalled => "hold_stalled",
            SignalType::Nov => "nov",
            SignalType::Abatement => "abatement",
            SignalType::ExpiredUninspected => "expired_uninspected",
            SignalType::StaleWithActivity => "stale_with_activity",
            SignalType::ExpiredMinorActivity => "expired_minor_activity",
            SignalType::ExpiredInconclusive => "expired_inconclusive",
            SignalType::ExpiredOtc => "expired_otc",
            SignalType::StaleNoActivity => "stale_no_activity",
            SignalType::Complaint => "complaint",
        }
    }
}

/// One immutable catalog entry.
#[derive(Debug, Clone)]
pub struct SignalTypeDefinition {
    pub signal_type: SignalType,
    pub default_severity: Severity,
    pub source_dataset: &'static str,
    pub actionable: Actionable,
    pub description: &'static str,
}

/// Static registry of every signal type plus the compounding subset whose
/// co-occurrence escalates a parcel to high risk. Built once at startup and
/// passed by reference into detectors and the aggregator.
#[derive(Debug, Clone)]
pub struct SignalCatalog {
    definitions: [SignalTypeDefinition; 12],
    compounding: [SignalType; 6],
}

impl SignalCatalog {
    pub fn new() -> Self {
        let definitions = [
            SignalTypeDefinition {
                signal_type: SignalType::HoldComments,
                default_severity: Severity::AtRisk,
                source_dataset: "addenda",
                actionable: Actionable::Yes,
                description: "Most recent station review result is Issued Comments",
            },
            SignalTypeDefinition {
                signal_type: SignalType::HoldStalledPlanning,
                default_severity: Severity::AtRisk,
                source_dataset: "addenda",
                actionable: Actionable::Yes,
                description: "Open planning-station review older than a year",
            },
            SignalTypeDefinition {
                signal_type: SignalType::HoldStalled,
                default_severity: Severity::Behind,
                source_dataset: "addenda",
                actionable: Actionable::Warning,
                description: "Open station review sitting 30 to 365 days",
            },
            SignalTypeDefinition {
                signal_type: SignalType::Nov,
                default_severity: Severity::AtRisk,
                source_dataset: "violations",
                actionable: Actionable::Yes,
                description: "Open notice of violation on the parcel",
            },
            SignalTypeDefinition {
                signal_type: SignalType::Abatement,
                default_severity: Severity::AtRisk,
                source_dataset: "violations",
                actionable: Actionable::Yes,
                description: "Open violation escalated to abatement proceedings",
            },
            SignalTypeDefinition {
                signal_type: SignalType::ExpiredUninspected,
                default_severity: Severity::AtRisk,
                source_dataset: "permits",
                actionable: Actionable::Yes,
                description: "Expired permit with real inspections but no final",
            },
            SignalTypeDefinition {
                signal_type: SignalType::StaleWithActivity,
                default_severity: Severity::Behind,
                source_dataset: "permits",
                actionable: Actionable::Warning,
                description: "Old issued permit still showing inspection activity",
            },
            SignalTypeDefinition {
                signal_type: SignalType::ExpiredMinorActivity,
                default_severity: Severity::Behind,
                source_dataset: "permits",
                actionable: Actionable::Warning,
                description: "Expired permit with only one to three real inspections",
            },
            SignalTypeDefinition {
                signal_type: SignalType::ExpiredInconclusive,
                default_severity: Severity::Slower,
                source_dataset: "permits",
                actionable: Actionable::Info,
                description: "Expired non-OTC permit with no real inspections",
            },
            SignalTypeDefinition {
                signal_type: SignalType::ExpiredOtc,
                default_severity: Severity::Slower,
                source_dataset: "permits",
                actionable: Actionable::Info,
                description: "Expired over-the-counter permit with no real inspections",
            },
            SignalTypeDefinition {
                signal_type: SignalType::StaleNoActivity,
                default_severity: Severity::Slower,
                source_dataset: "permits",
                actionable: Actionable::Info,
                description: "Old issued permit with no meaningful inspection activity",
            },
            SignalTypeDefinition {
                signal_type: SignalType::Complaint,
                default_severity: Severity::AtRisk,
                source_dataset: "complaints",
                actionable: Actionable::Yes,
                description: "Open complaint on a parcel with no open violation",
            },
        ];

        let compounding = [
            SignalType::HoldComments,
            SignalType::HoldStalledPlanning,
            SignalType::Nov,
            SignalType::Abatement,
            SignalType::ExpiredUninspected,
            SignalType::Complaint,
        ];

        SignalCatalog {
            definitions,
            compounding,
        }
    }

    pub fn definition(&self, signal_type: SignalType) -> &SignalTypeDefinition {
        // ALL order matches declaration order, so the discriminant indexes
        // directly into the definitions array.
        &self.definitions[signal_type as usize]
    }

    pub fn severity(&self, signal_type: SignalType) -> Severity {
        self.definition(signal_type).default_severity
    }

    pub fn is_compounding(&self, signal_type: SignalType) -> bool {
        self.compounding.contains(&signal_type)
    }

    pub fn definitions(&self) -> &[SignalTypeDefinition] {
        &self.definitions
    }

    pub fn compounding(&self) -> &[SignalType] {
        &self.compounding
    }
}

impl Default for SignalCatalog {
    fn default() -> Self {
        SignalCatalog::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_every_signal_type_in_order() {
        let catalog = SignalCatalog::new();
        assert_eq!(catalog.definitions().len(), SignalType::ALL.len());
        for (def, signal_type) in catalog.definitions().iter().zip(SignalType::ALL) {
            assert_eq!(def.signal_type, signal_type);
            assert_eq!(catalog.definition(signal_type).signal_type, signal_type);
        }
    }

    #[test]
    fn compounding_subset_has_six_catalog_members() {
        let catalog = SignalCatalog::new();
        assert_eq!(catalog.compounding().len(), 6);
        for signal_type in catalog.compounding() {
            assert!(SignalType::ALL.contains(signal_type));
        }
        // Distinct members.
        for (i, a) in catalog.compounding().iter().enumerate() {
            for b in &catalog.compounding()[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn severity_and_actionable_serialize_to_known_values() {
        let catalog = SignalCatalog::new();
        for def in catalog.definitions() {
            assert!(matches!(
                def.default_severity,
                Severity::AtRisk | Severity::Behind | Severity::Slower
            ));
            assert!(matches!(
                def.actionable,
                Actionable::Yes | Actionable::Warning | Actionable::Info
            ));
            assert!(!def.description.is_empty());
        }
        assert_eq!(Severity::AtRisk.as_str(), "at_risk");
        assert_eq!(Actionable::Warning.as_str(), "warning");
        assert_eq!(SignalType::ExpiredOtc.as_str(), "expired_otc");
    }

    #[test]
    fn signal_type_serde_matches_as_str() {
        for signal_type in SignalType::ALL {
            let json = serde_json::to_string(&signal_type).unwrap();
            assert_eq!(json, format!("\"{}\"", signal_type.as_str()));
        }
    }
}

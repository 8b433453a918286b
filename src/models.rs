use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::{Severity, SignalType, Tier};

/// Join an assessor's block and lot into the canonical parcel key.
pub fn block_lot(block: &str, lot: &str) -> String {
    format!("{}/{}", block.trim(), lot.trim())
}

/// One detected signal occurrence. Severity is always the catalog default
/// for the signal type; permit_number is None for parcel-only signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub severity: Severity,
    pub permit_number: Option<String>,
    pub block_lot: String,
    pub detail: String,
}

/// Aggregated per-parcel output, fully recomputed every run.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyHealth {
    pub block_lot: String,
    pub tier: Tier,
    pub signal_count: usize,
    pub at_risk_count: usize,
    pub signals: Vec<Signal>,
}

/// Per-detector result recorded in the run summary. A caught detector
/// failure leaves signal_count at zero and fills error.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorOutcome {
    pub detector: &'static str,
    pub signal_count: usize,
    pub error: Option<String>,
}

/// Structured result of one full pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total_signals: usize,
    pub permit_signal_rows: usize,
    pub property_signal_rows: usize,
    pub properties_scored: usize,
    pub tier_counts: BTreeMap<String, usize>,
    pub detectors: Vec<DetectorOutcome>,
}

/// One station visit during plan review, joined with its permit's parcel.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StationRecord {
    pub id: i64,
    pub permit_number: String,
    pub station: Option<String>,
    pub review_results: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub finish_date: Option<NaiveDate>,
    pub block: Option<String>,
    pub lot: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ViolationRecord {
    pub block: Option<String>,
    pub lot: Option<String>,
    pub status: Option<String>,
    pub nov_category_description: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ComplaintRecord {
    pub block: Option<String>,
    pub lot: Option<String>,
    pub status: Option<String>,
    pub complaint_description: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PermitRecord {
    pub permit_number: String,
    pub status: Option<String>,
    pub permit_type: Option<String>,
    pub block: Option<String>,
    pub lot: Option<String>,
    pub issued_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InspectionRecord {
    pub reference_number: Option<String>,
    pub result: Option<String>,
    pub inspection_description: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
}

/// A stored property_health row as read back for the health command.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HealthRow {
    pub block_lot: String,
    pub tier: String,
    pub signal_count: i64,
    pub at_risk_count: i64,
    pub signals_json: String,
    pub computed_at: DateTime<Utc>,
}

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::catalog::{SignalCatalog, SignalType};
use crate::models::{block_lot, InspectionRecord, Signal, StationRecord};
use crate::store::Store;

/// Review desks where an open record older than a year means the permit is
/// stuck in planning rather than ordinary queueing.
const PLANNING_STATIONS: [&str; 3] = ["CPC", "CP-ZOC", "PPC"];

/// Violation/complaint states that count as resolved.
const CLOSED_STATES: [&str; 3] = ["closed", "complied", "abated"];

/// Inspection results that represent a real site visit.
const REAL_RESULTS: [&str; 3] = ["PASSED", "FAILED", "DISAPPROVED"];

/// Over-the-counter permit type code.
const OTC_PERMIT_TYPE: &str = "8";

/// Open station records older than this date are legacy noise, not holds.
const STALLED_RECENCY_CUTOFF: NaiveDate = match NaiveDate::from_ymd_opt(2020, 1, 1) {
    Some(date) => date,
    None => panic!("invalid cutoff date"),
};

const STALLED_MIN_DAYS: i64 = 30;
const STALLED_MAX_DAYS: i64 = 365;
const STALE_ISSUED_DAYS: i64 = 730;
const ACTIVITY_WINDOW_DAYS: i64 = 1825;

impl SignalType {
    /// Run this signal type's detector. Read-only; returns an empty Vec when
    /// nothing matches and skips rows with missing parcel or date fields.
    /// Rolling-window detectors are deliberately sensitive to `as_of`.
    pub async fn detect(
        self,
        store: &Store,
        catalog: &SignalCatalog,
        as_of: NaiveDate,
    ) -> anyhow::Result<Vec<Signal>> {
        match self {
            SignalType::HoldComments => detect_hold_comments(store, catalog).await,
            SignalType::HoldStalledPlanning => {
                detect_hold_stalled_planning(store, catalog, as_of).await
            }
            SignalType::HoldStalled => detect_hold_stalled(store, catalog, as_of).await,
            SignalType::Nov => detect_nov(store, catalog).await,
            SignalType::Abatement => detect_abatement(store, catalog).await,
            SignalType::ExpiredUninspected => detect_expired_uninspected(store, catalog).await,
            SignalType::StaleWithActivity => {
                detect_stale_with_activity(store, catalog, as_of).await
            }
            SignalType::ExpiredMinorActivity => {
                detect_expired_minor_activity(store, catalog).await
            }
            SignalType::ExpiredInconclusive => {
                detect_expired_inconclusive(store, catalog).await
            }
            SignalType::ExpiredOtc => detect_expired_otc(store, catalog).await,
            SignalType::StaleNoActivity => detect_stale_no_activity(store, catalog, as_of).await,
            SignalType::Complaint => detect_complaint(store, catalog).await,
        }
    }
}

fn make_signal(
    catalog: &SignalCatalog,
    signal_type: SignalType,
    permit_number: Option<&str>,
    parcel: String,
    detail: String,
) -> Signal {
    Signal {
        signal_type,
        severity: catalog.severity(signal_type),
        permit_number: permit_number.map(str::to_string),
        block_lot: parcel,
        detail,
    }
}

fn parcel_of(block: Option<&str>, lot: Option<&str>) -> Option<String> {
    match (block, lot) {
        (Some(block), Some(lot)) if !block.trim().is_empty() && !lot.trim().is_empty() => {
            Some(block_lot(block, lot))
        }
        _ => None,
    }
}

/// Open means a status is present and not in the resolved set. Rows with a
/// missing status carry too little to act on and are skipped.
fn is_open_status(status: Option<&str>) -> bool {
    match status {
        Some(status) if !status.trim().is_empty() => {
            let status = status.trim().to_lowercase();
            !CLOSED_STATES.contains(&status.as_str())
        }
        _ => false,
    }
}

fn is_real_inspection(result: Option<&str>) -> bool {
    match result {
        Some(result) => REAL_RESULTS.contains(&result.trim().to_uppercase().as_str()),
        None => false,
    }
}

fn is_final_inspection(description: Option<&str>) -> bool {
    description
        .map(|d| d.to_lowercase().contains("final"))
        .unwrap_or(false)
}

fn is_abatement_category(category: Option<&str>) -> bool {
    let Some(category) = category else {
        return false;
    };
    let category = category.to_lowercase();
    category.contains("abatement") || category.contains("hearing") || category.contains("director")
}

/// An addenda record with neither a finish date nor a result is still
/// sitting on the station's desk.
fn is_open_record(record: &StationRecord) -> bool {
    record.finish_date.is_none()
        && record
            .review_results
            .as_deref()
            .map(|r| r.trim().is_empty())
            .unwrap_or(true)
}

fn is_planning_station(station: &str) -> bool {
    PLANNING_STATIONS.contains(&station.trim())
}

/// Per (permit, station), the single most-recent addenda record wins:
/// latest finish date first, then latest start date, then highest row id.
/// Records without a date sort as oldest. The precedence is load-bearing
/// for repeated station visits and must not be reordered.
fn latest_per_station(records: &[StationRecord]) -> Vec<&StationRecord> {
    let mut latest: HashMap<(&str, &str), &StationRecord> = HashMap::new();
    for record in records {
        let Some(station) = record.station.as_deref() else {
            continue;
        };
        let key = (record.permit_number.as_str(), station);
        latest
            .entry(key)
            .and_modify(|current| {
                let current_key = (current.finish_date, current.start_date, current.id);
                let candidate_key = (record.finish_date, record.start_date, record.id);
                if candidate_key > current_key {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest.into_values().collect()
}

async fn detect_hold_comments(
    store: &Store,
    catalog: &SignalCatalog,
) -> anyhow::Result<Vec<Signal>> {
    let records = store.station_records().await?;
    let mut signals = Vec::new();

    for record in latest_per_station(&records) {
        let result_is_comments = record
            .review_results
            .as_deref()
            .map(|r| r.trim() == "Issued Comments")
            .unwrap_or(false);
        if !result_is_comments {
            continue;
        }
        let Some(parcel) = parcel_of(record.block.as_deref(), record.lot.as_deref()) else {
            continue;
        };
        let station = record.station.as_deref().unwrap_or("unknown");
        signals.push(make_signal(
            catalog,
            SignalType::HoldComments,
            Some(&record.permit_number),
            parcel,
            format!("Station {station} issued comments awaiting response"),
        ));
    }

    Ok(signals)
}

async fn detect_hold_stalled_planning(
    store: &Store,
    catalog: &SignalCatalog,
    as_of: NaiveDate,
) -> anyhow::Result<Vec<Signal>> {
    let records = store.station_records().await?;
    let mut signals = Vec::new();

    for record in &records {
        if !is_open_record(record) {
            continue;
        }
        let Some(station) = record.station.as_deref() else {
            continue;
        };
        if !is_planning_station(station) {
            continue;
        }
        let Some(start) = record.start_date else {
            continue;
        };
        if (as_of - start).num_days() < STALLED_MAX_DAYS {
            continue;
        }
        let Some(parcel) = parcel_of(record.block.as_deref(), record.lot.as_deref()) else {
            continue;
        };
        signals.push(make_signal(
            catalog,
            SignalType::HoldStalledPlanning,
            Some(&record.permit_number),
            parcel,
            format!("Open at planning station {station} since {start}"),
        ));
    }

    Ok(signals)
}

async fn detect_hold_stalled(
    store: &Store,
    catalog: &SignalCatalog,
    as_of: NaiveDate,
) -> anyhow::Result<Vec<Signal>> {
    let records = store.station_records().await?;
    let mut signals = Vec::new();

    for record in &records {
        if !is_open_record(record) {
            continue;
        }
        let Some(station) = record.station.as_deref() else {
            continue;
        };
        if is_planning_station(station) {
            continue;
        }
        let Some(start) = record.start_date else {
            continue;
        };
        if start < STALLED_RECENCY_CUTOFF {
            continue;
        }
        let days_open = (as_of - start).num_days();
        if !(STALLED_MIN_DAYS..=STALLED_MAX_DAYS).contains(&days_open) {
            continue;
        }
        let Some(parcel) = parcel_of(record.block.as_deref(), record.lot.as_deref()) else {
            continue;
        };
        signals.push(make_signal(
            catalog,
            SignalType::HoldStalled,
            Some(&record.permit_number),
            parcel,
            format!("Open at station {station} for {days_open} days"),
        ));
    }

    Ok(signals)
}

async fn detect_nov(store: &Store, catalog: &SignalCatalog) -> anyhow::Result<Vec<Signal>> {
    let violations = store.violations().await?;
    let mut open_by_parcel: HashMap<String, usize> = HashMap::new();

    for violation in &violations {
        if !is_open_status(violation.status.as_deref()) {
            continue;
        }
        let Some(parcel) = parcel_of(violation.block.as_deref(), violation.lot.as_deref()) else {
            continue;
        };
        *open_by_parcel.entry(parcel).or_insert(0) += 1;
    }

    let mut signals: Vec<Signal> = open_by_parcel
        .into_iter()
        .map(|(parcel, count)| {
            make_signal(
                catalog,
                SignalType::Nov,
                None,
                parcel,
                format!("{count} open NOV(s) on the parcel"),
            )
        })
        .collect();
    signals.sort_by(|a, b| a.block_lot.cmp(&b.block_lot));
    Ok(signals)
}

async fn detect_abatement(store: &Store, catalog: &SignalCatalog) -> anyhow::Result<Vec<Signal>> {
    let violations = store.violations().await?;
    let mut open_by_parcel: HashMap<String, usize> = HashMap::new();

    for violation in &violations {
        if !is_open_status(violation.status.as_deref()) {
            continue;
        }
        if !is_abatement_category(violation.nov_category_description.as_deref()) {
            continue;
        }
        let Some(parcel) = parcel_of(violation.block.as_deref(), violation.lot.as_deref()) else {
            continue;
        };
        *open_by_parcel.entry(parcel).or_insert(0) += 1;
    }

    let mut signals: Vec<Signal> = open_by_parcel
        .into_iter()
        .map(|(parcel, count)| {
            make_signal(
                catalog,
                SignalType::Abatement,
                None,
                parcel,
                format!("{count} open abatement proceeding(s) on the parcel"),
            )
        })
        .collect();
    signals.sort_by(|a, b| a.block_lot.cmp(&b.block_lot));
    Ok(signals)
}

#[derive(Debug, Default, Clone)]
struct InspectionProfile {
    real_count: usize,
    has_final: bool,
    latest_real: Option<NaiveDate>,
}

fn inspection_profiles(inspections: &[InspectionRecord]) -> HashMap<String, InspectionProfile> {
    let mut profiles: HashMap<String, InspectionProfile> = HashMap::new();
    for inspection in inspections {
        if !is_real_inspection(inspection.result.as_deref()) {
            continue;
        }
        let Some(reference) = inspection.reference_number.as_deref() else {
            continue;
        };
        let profile = profiles.entry(reference.to_string()).or_default();
        profile.real_count += 1;
        if is_final_inspection(inspection.inspection_description.as_deref()) {
            profile.has_final = true;
        }
        if inspection.scheduled_date > profile.latest_real {
            profile.latest_real = inspection.scheduled_date;
        }
    }
    profiles
}

async fn detect_expired_uninspected(
    store: &Store,
    catalog: &SignalCatalog,
) -> anyhow::Result<Vec<Signal>> {
    let permits = store.permits_by_status("expired").await?;
    let profiles = inspection_profiles(&store.inspections().await?);
    let mut signals = Vec::new();

    for permit in &permits {
        let Some(parcel) = parcel_of(permit.block.as_deref(), permit.lot.as_deref()) else {
            continue;
        };
        let profile = profiles.get(&permit.permit_number).cloned().unwrap_or_default();
        if profile.real_count >= 4 && !profile.has_final {
            signals.push(make_signal(
                catalog,
                SignalType::ExpiredUninspected,
                Some(&permit.permit_number),
                parcel,
                format!(
                    "Expired with {} real inspections and no final",
                    profile.real_count
                ),
            ));
        }
    }

    Ok(signals)
}

async fn detect_stale_with_activity(
    store: &Store,
    catalog: &SignalCatalog,
    as_of: NaiveDate,
) -> anyhow::Result<Vec<Signal>> {
    let permits = store.permits_by_status("issued").await?;
    let profiles = inspection_profiles(&store.inspections().await?);
    let mut signals = Vec::new();

    for permit in &permits {
        let Some(issued) = permit.issued_date else {
            continue;
        };
        if (as_of - issued).num_days() < STALE_ISSUED_DAYS {
            continue;
        }
        let Some(parcel) = parcel_of(permit.block.as_deref(), permit.lot.as_deref()) else {
            continue;
        };
        let profile = profiles.get(&permit.permit_number).cloned().unwrap_or_default();
        let recent_visit = profile
            .latest_real
            .map(|latest| (as_of - latest).num_days() <= ACTIVITY_WINDOW_DAYS)
            .unwrap_or(false);
        if profile.real_count >= 2 && recent_visit {
            signals.push(make_signal(
                catalog,
                SignalType::StaleWithActivity,
                Some(&permit.permit_number),
                parcel,
                format!(
                    "Issued {issued}, still open with {} real inspections",
                    profile.real_count
                ),
            ));
        }
    }

    Ok(signals)
}

async fn detect_expired_minor_activity(
    store: &Store,
    catalog: &SignalCatalog,
) -> anyhow::Result<Vec<Signal>> {
    let permits = store.permits_by_status("expired").await?;
    let profiles = inspection_profiles(&store.inspections().await?);
    let mut signals = Vec::new();

    for permit in &permits {
        let Some(parcel) = parcel_of(permit.block.as_deref(), permit.lot.as_deref()) else {
            continue;
        };
        let profile = profiles.get(&permit.permit_number).cloned().unwrap_or_default();
        if (1..=3).contains(&profile.real_count) {
            signals.push(make_signal(
                catalog,
                SignalType::ExpiredMinorActivity,
                Some(&permit.permit_number),
                parcel,
                format!("Expired after only {} real inspection(s)", profile.real_count),
            ));
        }
    }

    Ok(signals)
}

async fn detect_expired_inconclusive(
    store: &Store,
    catalog: &SignalCatalog,
) -> anyhow::Result<Vec<Signal>> {
    let permits = store.permits_by_status("expired").await?;
    let profiles = inspection_profiles(&store.inspections().await?);
    let mut signals = Vec::new();

    for permit in &permits {
        if permit.permit_type.as_deref().map(str::trim) == Some(OTC_PERMIT_TYPE) {
            continue;
        }
        let Some(parcel) = parcel_of(permit.block.as_deref(), permit.lot.as_deref()) else {
            continue;
        };
        let real_count = profiles
            .get(&permit.permit_number)
            .map(|p| p.real_count)
            .unwrap_or(0);
        if real_count == 0 {
            signals.push(make_signal(
                catalog,
                SignalType::ExpiredInconclusive,
                Some(&permit.permit_number),
                parcel,
                "Expired with no real inspections on record".to_string(),
            ));
        }
    }

    Ok(signals)
}

async fn detect_expired_otc(
    store: &Store,
    catalog: &SignalCatalog,
) -> anyhow::Result<Vec<Signal>> {
    let permits = store.permits_by_status("expired").await?;
    let profiles = inspection_profiles(&store.inspections().await?);
    let mut signals = Vec::new();

    for permit in &permits {
        if permit.permit_type.as_deref().map(str::trim) != Some(OTC_PERMIT_TYPE) {
            continue;
        }
        let Some(parcel) = parcel_of(permit.block.as_deref(), permit.lot.as_deref()) else {
            continue;
        };
        let real_count = profiles
            .get(&permit.permit_number)
            .map(|p| p.real_count)
            .unwrap_or(0);
        if real_count == 0 {
            signals.push(make_signal(
                catalog,
                SignalType::ExpiredOtc,
                Some(&permit.permit_number),
                parcel,
                "Expired over-the-counter permit, never inspected".to_string(),
            ));
        }
    }

    Ok(signals)
}

/// Written as its own predicate on purpose: an old issued permit counts as
/// inactive when it has fewer than two real inspections or the latest real
/// inspection fell outside the activity window. If the activity definition
/// in detect_stale_with_activity changes, this must change with it.
async fn detect_stale_no_activity(
    store: &Store,
    catalog: &SignalCatalog,
    as_of: NaiveDate,
) -> anyhow::Result<Vec<Signal>> {
    let permits = store.permits_by_status("issued").await?;
    let profiles = inspection_profiles(&store.inspections().await?);
    let mut signals = Vec::new();

    for permit in &permits {
        let Some(issued) = permit.issued_date else {
            continue;
        };
        if (as_of - issued).num_days() < STALE_ISSUED_DAYS {
            continue;
        }
        let Some(parcel) = parcel_of(permit.block.as_deref(), permit.lot.as_deref()) else {
            continue;
        };
        let profile = profiles.get(&permit.permit_number).cloned().unwrap_or_default();
        let inactive = profile.real_count < 2
            || profile
                .latest_real
                .map(|latest| (as_of - latest).num_days() > ACTIVITY_WINDOW_DAYS)
                .unwrap_or(true);
        if inactive {
            signals.push(make_signal(
                catalog,
                SignalType::StaleNoActivity,
                Some(&permit.permit_number),
                parcel,
                format!("Issued {issued} with no meaningful inspection activity"),
            ));
        }
    }

    Ok(signals)
}

async fn detect_complaint(store: &Store, catalog: &SignalCatalog) -> anyhow::Result<Vec<Signal>> {
    let complaints = store.complaints().await?;
    let violations = store.violations().await?;

    let parcels_with_open_violation: HashSet<String> = violations
        .iter()
        .filter(|v| is_open_status(v.status.as_deref()))
        .filter_map(|v| parcel_of(v.block.as_deref(), v.lot.as_deref()))
        .collect();

    let mut open_by_parcel: HashMap<String, usize> = HashMap::new();
    for complaint in &complaints {
        if !is_open_status(complaint.status.as_deref()) {
            continue;
        }
        let Some(parcel) = parcel_of(complaint.block.as_deref(), complaint.lot.as_deref()) else {
            continue;
        };
        // An open NOV already covers the parcel; the complaint adds nothing.
        if parcels_with_open_violation.contains(&parcel) {
            continue;
        }
        *open_by_parcel.entry(parcel).or_insert(0) += 1;
    }

    let mut signals: Vec<Signal> = open_by_parcel
        .into_iter()
        .map(|(parcel, count)| {
            make_signal(
                catalog,
                SignalType::Complaint,
                None,
                parcel,
                format!("{count} open complaint(s) with no open violation"),
            )
        })
        .collect();
    signals.sort_by(|a, b| a.block_lot.cmp(&b.block_lot));
    Ok(signals)
}

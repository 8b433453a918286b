use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::catalog::{SignalCatalog, SignalType};
use crate::health::compute_property_health;
use crate::models::{DetectorOutcome, RunSummary, Signal};
use crate::store::Store;

/// One full refresh cycle: ensure schema, detect, truncate-and-rebuild the
/// output tables, aggregate, summarize. Detector failures are caught and
/// recorded per detector; truncate/persist/upsert failures abort the run.
///
/// All writes happen in a single transaction opened after detection, so the
/// rebuild is atomic and a failed run leaves the previous output in place.
/// Running twice on unchanged data yields identical counts and exactly one
/// health row per parcel.
pub async fn run_signal_pipeline(
    store: &Store,
    catalog: &SignalCatalog,
) -> anyhow::Result<RunSummary> {
    let clock = Instant::now();
    let started_at = Utc::now();
    let as_of = started_at.date_naive();

    info!(backend = store.backend_name(), %as_of, "signal pipeline starting");

    store
        .ensure_output_tables()
        .await
        .context("ensure output tables")?;

    // Fixed detector order; a thrown query must not starve the rest.
    let mut all_signals: Vec<Signal> = Vec::new();
    let mut outcomes: Vec<DetectorOutcome> = Vec::new();
    for signal_type in SignalType::ALL {
        match signal_type.detect(store, catalog, as_of).await {
            Ok(signals) => {
                debug!(
                    detector = signal_type.as_str(),
                    count = signals.len(),
                    "detector finished"
                );
                outcomes.push(DetectorOutcome {
                    detector: signal_type.as_str(),
                    signal_count: signals.len(),
                    error: None,
                });
                all_signals.extend(signals);
            }
            Err(err) => {
                warn!(
                    detector = signal_type.as_str(),
                    error = %err,
                    "detector failed, continuing with the rest"
                );
                outcomes.push(DetectorOutcome {
                    detector: signal_type.as_str(),
                    signal_count: 0,
                    error: Some(format!("{err:#}")),
                });
            }
        }
    }

    let detected_at = Utc::now();
    let mut batch = store.begin().await.context("open write transaction")?;
    batch
        .truncate_outputs()
        .await
        .context("truncate output tables")?;

    let mut permit_signal_rows = 0usize;
    for signal in &all_signals {
        if let Some(permit_number) = signal.permit_number.as_deref() {
            batch
                .insert_permit_signal(signal, permit_number, detected_at)
                .await
                .context("persist permit signals")?;
            permit_signal_rows += 1;
        }
    }

    // Parcel-only signals bucket alongside permit-backed ones here.
    let mut by_parcel: BTreeMap<String, Vec<Signal>> = BTreeMap::new();
    for signal in &all_signals {
        by_parcel
            .entry(signal.block_lot.clone())
            .or_default()
            .push(signal.clone());
    }

    let mut property_signal_rows = 0usize;
    for signals in by_parcel.values() {
        for signal in signals {
            batch
                .insert_property_signal(signal, detected_at)
                .await
                .context("persist property signals")?;
            property_signal_rows += 1;
        }
    }

    let mut tier_counts: BTreeMap<String, usize> = BTreeMap::new();
    for (parcel, signals) in &by_parcel {
        let health = compute_property_health(parcel, signals, catalog);
        *tier_counts
            .entry(health.tier.as_str().to_string())
            .or_insert(0) += 1;
        batch
            .upsert_property_health(&health, detected_at)
            .await
            .context("upsert property health")?;
    }
    let properties_scored = by_parcel.len();

    batch.commit().await.context("commit signal run")?;

    let summary = RunSummary {
        started_at,
        elapsed_ms: clock.elapsed().as_millis() as u64,
        total_signals: all_signals.len(),
        permit_signal_rows,
        property_signal_rows,
        properties_scored,
        tier_counts,
        detectors: outcomes,
    };

    info!(
        total_signals = summary.total_signals,
        properties = summary.properties_scored,
        elapsed_ms = summary.elapsed_ms,
        "signal pipeline complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.init_db().await.unwrap();
        store
    }

    async fn exec(store: &Store, sql: &str) {
        match store {
            Store::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await.unwrap();
            }
            Store::Postgres(_) => unreachable!("tests run on sqlite"),
        }
    }

    async fn count(store: &Store, table: &str) -> i64 {
        match store {
            Store::Sqlite(pool) => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(pool)
                    .await
                    .unwrap()
            }
            Store::Postgres(_) => unreachable!("tests run on sqlite"),
        }
    }

    #[tokio::test]
    async fn single_open_violation_scores_at_risk() {
        let store = test_store().await;
        exec(
            &store,
            "INSERT INTO violations (block, lot, status, nov_category_description) \
             VALUES ('0001', '001', 'open', 'Building without permit')",
        )
        .await;

        let catalog = SignalCatalog::new();
        let summary = run_signal_pipeline(&store, &catalog).await.unwrap();
        assert_eq!(summary.total_signals, 1);
        assert_eq!(summary.permit_signal_rows, 0);
        assert_eq!(summary.property_signal_rows, 1);
        assert_eq!(summary.properties_scored, 1);

        let health = store.fetch_health("0001/001").await.unwrap().unwrap();
        assert_eq!(health.tier, "at_risk");
        assert_eq!(health.signal_count, 1);
        assert_eq!(health.at_risk_count, 1);
        assert!(health.signals_json.contains("nov"));
    }

    #[tokio::test]
    async fn second_compounding_type_upgrades_to_high_risk() {
        let store = test_store().await;
        exec(
            &store,
            "INSERT INTO violations (block, lot, status, nov_category_description) \
             VALUES ('0001', '001', 'open', 'Building without permit')",
        )
        .await;
        exec(
            &store,
            "INSERT INTO permits (permit_number, status, permit_type, block, lot) \
             VALUES ('202301010001', 'filed', '3', '0001', '001')",
        )
        .await;
        exec(
            &store,
            "INSERT INTO addenda (application_number, station, review_results, start_date, finish_date) \
             VALUES ('202301010001', 'CPC', 'Issued Comments', '2024-01-05', '2024-01-20')",
        )
        .await;

        let catalog = SignalCatalog::new();
        let summary = run_signal_pipeline(&store, &catalog).await.unwrap();
        assert_eq!(summary.total_signals, 2);
        assert_eq!(summary.permit_signal_rows, 1);

        let health = store.fetch_health("0001/001").await.unwrap().unwrap();
        assert_eq!(health.tier, "high_risk");
        assert_eq!(health.signal_count, 2);
        assert_eq!(health.at_risk_count, 2);
    }

    #[tokio::test]
    async fn consecutive_runs_are_idempotent() {
        let store = test_store().await;
        store.seed().await.unwrap();
        let catalog = SignalCatalog::new();

        let first = run_signal_pipeline(&store, &catalog).await.unwrap();
        let second = run_signal_pipeline(&store, &catalog).await.unwrap();

        assert!(first.total_signals > 0);
        assert_eq!(first.total_signals, second.total_signals);
        assert_eq!(first.permit_signal_rows, second.permit_signal_rows);
        assert_eq!(first.property_signal_rows, second.property_signal_rows);
        assert_eq!(first.properties_scored, second.properties_scored);
        assert_eq!(first.tier_counts, second.tier_counts);

        // Exactly one health row per distinct parcel, no accumulation.
        let health_rows = count(&store, "property_health").await;
        assert_eq!(health_rows as usize, second.properties_scored);
        let signal_rows = count(&store, "property_signals").await;
        assert_eq!(signal_rows as usize, second.property_signal_rows);
    }

    #[tokio::test]
    async fn failing_detector_does_not_block_the_rest() {
        let store = test_store().await;
        exec(
            &store,
            "INSERT INTO violations (block, lot, status, nov_category_description) \
             VALUES ('0001', '001', 'open', 'Building without permit')",
        )
        .await;
        // Make the complaint detector's query throw.
        exec(&store, "DROP TABLE complaints").await;

        let catalog = SignalCatalog::new();
        let summary = run_signal_pipeline(&store, &catalog).await.unwrap();

        let complaint = summary
            .detectors
            .iter()
            .find(|o| o.detector == "complaint")
            .unwrap();
        assert!(complaint.error.is_some());
        assert_eq!(complaint.signal_count, 0);

        // The other detectors' output still landed.
        assert_eq!(summary.total_signals, 1);
        let health = store.fetch_health("0001/001").await.unwrap().unwrap();
        assert_eq!(health.tier, "at_risk");
    }

    #[tokio::test]
    async fn summary_reports_all_detectors_in_order() {
        let store = test_store().await;
        let catalog = SignalCatalog::new();
        let summary = run_signal_pipeline(&store, &catalog).await.unwrap();
        assert_eq!(summary.detectors.len(), SignalType::ALL.len());
        for (outcome, signal_type) in summary.detectors.iter().zip(SignalType::ALL) {
            assert_eq!(outcome.detector, signal_type.as_str());
            assert!(outcome.error.is_none());
        }
        assert_eq!(summary.total_signals, 0);
        assert_eq!(summary.properties_scored, 0);
    }
}

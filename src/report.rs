use std::fmt::Write;

use crate::models::RunSummary;

/// Render a run summary as plain text for the operator driving the
/// scheduler. Machine consumers take the summary as JSON instead.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Signal Pipeline Run");
    let _ = writeln!(
        output,
        "Started {} | elapsed {} ms",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.elapsed_ms
    );
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{} signals across {} parcels ({} permit rows, {} property rows)",
        summary.total_signals,
        summary.properties_scored,
        summary.permit_signal_rows,
        summary.property_signal_rows
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Health Tiers");
    if summary.tier_counts.is_empty() {
        let _ = writeln!(output, "No parcels scored this run.");
    } else {
        for (tier, count) in &summary.tier_counts {
            let _ = writeln!(output, "- {tier}: {count}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Detectors");
    for outcome in &summary.detectors {
        match &outcome.error {
            Some(error) => {
                let _ = writeln!(output, "- {}: FAILED ({error})", outcome.detector);
            }
            None => {
                let _ = writeln!(
                    output,
                    "- {}: {} signal(s)",
                    outcome.detector, outcome.signal_count
                );
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectorOutcome;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn summary_lists_tiers_and_detector_failures() {
        let mut tier_counts = BTreeMap::new();
        tier_counts.insert("at_risk".to_string(), 2);
        tier_counts.insert("on_track".to_string(), 0);

        let summary = RunSummary {
            started_at: Utc::now(),
            elapsed_ms: 42,
            total_signals: 3,
            permit_signal_rows: 1,
            property_signal_rows: 3,
            properties_scored: 2,
            tier_counts,
            detectors: vec![
                DetectorOutcome {
                    detector: "nov",
                    signal_count: 2,
                    error: None,
                },
                DetectorOutcome {
                    detector: "complaint",
                    signal_count: 0,
                    error: Some("no such table: complaints".to_string()),
                },
            ],
        };

        let text = render_summary(&summary);
        assert!(text.contains("3 signals across 2 parcels"));
        assert!(text.contains("- at_risk: 2"));
        assert!(text.contains("- nov: 2 signal(s)"));
        assert!(text.contains("- complaint: FAILED (no such table: complaints)"));
    }

    #[test]
    fn empty_run_renders_placeholder() {
        let summary = RunSummary {
            started_at: Utc::now(),
            elapsed_ms: 1,
            total_signals: 0,
            permit_signal_rows: 0,
            property_signal_rows: 0,
            properties_scored: 0,
            tier_counts: BTreeMap::new(),
            detectors: Vec::new(),
        };
        let text = render_summary(&summary);
        assert!(text.contains("No parcels scored this run."));
    }
}

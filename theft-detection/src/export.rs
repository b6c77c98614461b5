use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::Serialize;
use time::{macros::format_description, OffsetDateTime};
use usage_client::domain::{Period, RiskTier};

use crate::report::AnalysisReport;

#[derive(Serialize)]
struct ScoreRow<'a> {
    period: Period,
    rank: usize,
    customer_id: &'a str,
    consumption: f64,
    deviation: f64,
    anomaly_score: f64,
    risk_tier: RiskTier,
}

#[derive(Serialize)]
struct TrendRow<'a> {
    customer_id: &'a str,
    prev_month: Period,
    current_month: Period,
    prev_units: f64,
    current_units: f64,
    units_change: f64,
    units_change_pct: f64,
    prev_peak_load: Option<f64>,
    current_peak_load: Option<f64>,
    peak_load_change: Option<f64>,
    peak_load_change_pct: Option<f64>,
    is_suspicious: bool,
    risk_level: RiskTier,
    reasons: String,
}

/// Timestamp suffix for export file names, e.g. `20240131_174502`.
pub fn export_stamp() -> anyhow::Result<String> {
    let stamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    Ok(stamp)
}

/// Ranked per-period scores.
pub fn write_scores<W: Write>(out: W, report: &AnalysisReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    for (period, batch) in report.scored_periods() {
        for (idx, r) in batch.results.iter().enumerate() {
            wtr.serialize(ScoreRow {
                period,
                rank: idx + 1,
                customer_id: &r.customer_id,
                consumption: r.consumption,
                deviation: r.deviation,
                anomaly_score: r.anomaly_score,
                risk_tier: r.risk_tier,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Month-over-month detail rows.
pub fn write_trends<W: Write>(out: W, report: &AnalysisReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    for t in &report.trends {
        wtr.serialize(TrendRow {
            customer_id: &t.customer_id,
            prev_month: t.prev_period,
            current_month: t.current_period,
            prev_units: t.prev_units,
            current_units: t.current_units,
            units_change: t.units_change,
            units_change_pct: t.units_change_pct,
            prev_peak_load: t.prev_peak_load,
            current_peak_load: t.current_peak_load,
            peak_load_change: t.peak_load_change,
            peak_load_change_pct: t.peak_load_change_pct,
            is_suspicious: t.is_suspicious,
            risk_level: t.risk_tier,
            reasons: t.reasons_label(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_summaries<W: Write>(out: W, report: &AnalysisReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    for s in &report.summaries {
        wtr.serialize(s)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write all three exports into `dir`, creating it if needed.
pub fn write_exports(dir: &Path, report: &AnalysisReport, stamp: &str) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let scores = dir.join(format!("anomaly_scores_{stamp}.csv"));
    write_scores(fs::File::create(&scores)?, report)?;

    let trends = dir.join(format!("detailed_analysis_{stamp}.csv"));
    write_trends(fs::File::create(&trends)?, report)?;

    let summary = dir.join(format!("customer_summary_{stamp}.csv"));
    write_summaries(fs::File::create(&summary)?, report)?;

    tracing::info!(dir = %dir.display(), "exports written");
    Ok(vec![scores, trends, summary])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        pipeline::Envelope,
        sinks::CollectedBatch,
    };
    use std::time::SystemTime;
    use usage_client::domain::UsageRecord;

    fn report() -> AnalysisReport {
        let rows = [
            ("A", "2023-01", 100.0, 1.5),
            ("B", "2023-01", 100.0, 1.5),
            ("C", "2023-01", 100.0, 1.5),
            ("D", "2023-01", 500.0, 5.0),
            ("D", "2023-02", 100.0, 1.0),
        ];
        let records = rows
            .iter()
            .map(|(id, period, units, peak)| Envelope {
                payload: UsageRecord::new(*id, period.parse().unwrap(), *units).with_peak_load(*peak),
                received_at: SystemTime::now(),
                origin: None,
            })
            .collect();
        AnalysisReport::build(
            CollectedBatch {
                records,
                rejected: vec![],
            },
            &AppConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn scores_csv_is_ranked() {
        let mut buf = Vec::new();
        write_scores(&mut buf, &report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("period,rank,customer_id,consumption,deviation,anomaly_score,risk_tier")
        );
        assert!(lines.next().unwrap().starts_with("2023-01,1,D,500.0,"));
        assert!(text.trim_end().ends_with(",Low"));
    }

    #[test]
    fn trends_csv_joins_reasons() {
        let mut buf = Vec::new();
        write_trends(&mut buf, &report()).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("Sudden drop in units consumed"));
        assert!(text.contains(",true,High,"));
    }

    #[test]
    fn summary_csv_has_one_row_per_customer() {
        let mut buf = Vec::new();
        write_summaries(&mut buf, &report()).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("customer_id,total_months,avg_units"));
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn writes_all_files_into_directory() {
        let dir = std::env::temp_dir().join(format!("theft-detection-export-{}", std::process::id()));
        let paths = write_exports(&dir, &report(), "20240101_000000").unwrap();

        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.exists()));
        fs::remove_dir_all(&dir).unwrap();
    }
}

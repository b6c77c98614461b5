use anyhow::{bail, Result};
use std::{env, sync::Arc};
use theft_detection::{
    config::AppConfig,
    export,
    observability,
    pipeline::Pipeline,
    report::{AnalysisReport, PeriodOutcome},
    sinks::BatchCollector,
    sources::UsageCsvSource,
    transform,
};
use usage_client::domain::UsageRecord;

/// Score one or more monthly usage CSV files and print the ranked results.
///
/// Usage:
///   score_usage <csv_file> [<csv_file>...]
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let files: Vec<String> = env::args().skip(1).collect();
    if files.is_empty() {
        bail!("usage: score_usage <csv_file> [<csv_file>...]");
    }

    // Load configuration (THEFT_DETECTION_CONFIG can point to a specific file).
    let cfg = AppConfig::load()?;

    let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
        source: UsageCsvSource::from_paths(&files),
        transforms: vec![Arc::new(transform::UsageValidation::default())],
        sink: BatchCollector,
    };
    let collected = pipeline.run().await?;
    let report = AnalysisReport::build(collected, &cfg)?;

    print_report(&report);

    if let Some(export_cfg) = &cfg.export {
        let stamp = export::export_stamp()?;
        for path in export::write_exports(&export_cfg.dir, &report, &stamp)? {
            println!("wrote {}", path.display());
        }
    }

    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!(
        "{} records, {} customers, {} periods (fingerprint {})",
        report.total_records,
        report.customers,
        report.periods.len(),
        &report.fingerprint[..12]
    );

    for period in &report.periods {
        println!();
        match &period.outcome {
            PeriodOutcome::Scored(batch) => {
                println!(
                    "== {} | centre {:.2} spread {:.2} ({:?})",
                    period.period, batch.reference.centre, batch.reference.spread, batch.reference.estimator
                );
                println!("{:>4}  {:<16} {:>12} {:>9} {:>8}", "rank", "customer_id", "consumption", "score", "tier");
                for (idx, r) in batch.results.iter().enumerate() {
                    println!(
                        "{:>4}  {:<16} {:>12.2} {:>9.3} {:>8}",
                        idx + 1,
                        r.customer_id,
                        r.consumption,
                        r.anomaly_score,
                        r.risk_tier
                    );
                }
            }
            PeriodOutcome::Rejected { error } => {
                println!("== {} | rejected: {error}", period.period);
            }
        }
    }

    if !report.summaries.is_empty() {
        println!();
        println!(
            "customer risk: {} high, {} medium, {} low",
            report.customer_risk.high, report.customer_risk.medium, report.customer_risk.low
        );
        if let Some(rate) = report.suspicious_rate_pct {
            println!("suspicious month-over-month rate: {rate:.1}%");
        }
    }

    if let Some(eval) = &report.evaluation {
        let pct = |v: Option<f64>| v.map(|x| format!("{:.1}%", x * 100.0)).unwrap_or_else(|| "n/a".to_string());
        println!(
            "labels: {} evaluated, accuracy {}, precision {}, recall {}",
            eval.labelled(),
            pct(eval.accuracy()),
            pct(eval.precision()),
            pct(eval.recall())
        );
    }

    if !report.rejected_rows.is_empty() {
        println!();
        println!("{} rows rejected:", report.rejected_rows.len());
        for rejection in &report.rejected_rows {
            println!("  {rejection}");
        }
    }
}

use std::{
    collections::BTreeMap,
    fs::File,
    io::{Cursor, Read},
    path::PathBuf,
    sync::Arc,
    time::SystemTime,
};

use csv::{ByteRecord, StringRecord};
use futures::Stream;
use usage_client::domain::{Period, UsageRecord};

use crate::pipeline::{Envelope, PipelineError, RecordOrigin, RowRejection, Source};

const CUSTOMER_ID_COLUMNS: &[&str] = &["customer_id"];
const PERIOD_COLUMNS: &[&str] = &["period", "month"];
const CONSUMPTION_COLUMNS: &[&str] = &["consumption", "units_consumed", "kwh"];
const PEAK_LOAD_COLUMNS: &[&str] = &["peak_load_kw"];
const LABEL_COLUMNS: &[&str] = &["is_anomaly"];

#[derive(Clone)]
enum CsvInput {
    File(PathBuf),
    Upload { name: Arc<str>, data: Arc<[u8]> },
}

impl CsvInput {
    fn name(&self) -> Arc<str> {
        match self {
            Self::File(path) => Arc::from(path.display().to_string()),
            Self::Upload { name, .. } => name.clone(),
        }
    }

    fn open(&self) -> Result<Box<dyn Read + Send>, PipelineError> {
        match self {
            Self::File(path) => {
                let file = File::open(path).map_err(|e| {
                    PipelineError::Source(format!("failed to open CSV file '{}': {e}", path.display()))
                })?;
                Ok(Box::new(file))
            }
            Self::Upload { data, .. } => Ok(Box::new(Cursor::new(data.clone()))),
        }
    }
}

/// CSV source for monthly `UsageRecord`s, one row per customer per month.
///
/// Expected header columns (by name, case-insensitive):
/// - customer_id
/// - period | month (YYYY-MM)
/// - consumption | units_consumed | kwh
/// - peak_load_kw (optional)
/// - is_anomaly (optional, 0/1/true/false)
///
/// Any other column is carried through as a record attribute. Several inputs
/// are read back to back into a single stream.
pub struct UsageCsvSource {
    inputs: Vec<CsvInput>,
}

impl UsageCsvSource {
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            inputs: paths.into_iter().map(|p| CsvInput::File(p.into())).collect(),
        }
    }

    pub fn from_bytes(name: &str, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            inputs: vec![CsvInput::Upload {
                name: Arc::from(name),
                data: data.into(),
            }],
        }
    }
}

#[derive(Debug)]
struct ColumnMap {
    customer_id: usize,
    period: usize,
    consumption: usize,
    peak_load_kw: Option<usize>,
    is_anomaly: Option<usize>,
    attributes: Vec<(usize, String)>,
}

impl ColumnMap {
    fn resolve(headers: &StringRecord) -> Result<Self, String> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let find = |names: &[&str]| normalized.iter().position(|h| names.contains(&h.as_str()));
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| format!("missing required column '{}'", names.join("' or '")))
        };

        let customer_id = require(CUSTOMER_ID_COLUMNS)?;
        let period = require(PERIOD_COLUMNS)?;
        let consumption = require(CONSUMPTION_COLUMNS)?;
        let peak_load_kw = find(PEAK_LOAD_COLUMNS);
        let is_anomaly = find(LABEL_COLUMNS);

        let known = [Some(customer_id), Some(period), Some(consumption), peak_load_kw, is_anomaly];
        let attributes = normalized
            .iter()
            .enumerate()
            .filter(|(idx, name)| !known.contains(&Some(*idx)) && !name.is_empty())
            .map(|(idx, name)| (idx, name.clone()))
            .collect();

        Ok(Self {
            customer_id,
            period,
            consumption,
            peak_load_kw,
            is_anomaly,
            attributes,
        })
    }
}

fn parse_optional_f64(s: &str) -> Result<Option<f64>, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        trimmed.parse().map(Some).map_err(|_| trimmed.to_string())
    }
}

fn parse_label(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" => Some(true),
        "0" | "0.0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Structural parse of one row. Range checks are left to validation.
fn record_to_usage(record: &StringRecord, columns: &ColumnMap) -> Result<UsageRecord, String> {
    let get = |idx: usize| record.get(idx).unwrap_or("");

    let customer_id = get(columns.customer_id).trim().to_string();

    let period_str = get(columns.period);
    let period: Period = period_str.parse().map_err(|e| format!("{e}"))?;

    let consumption_str = get(columns.consumption);
    let consumption = match parse_optional_f64(consumption_str) {
        Ok(Some(v)) => v,
        Ok(None) => return Err("consumption is missing".to_string()),
        Err(raw) => return Err(format!("invalid consumption '{raw}'")),
    };

    let peak_load_kw = match columns.peak_load_kw {
        Some(idx) => parse_optional_f64(get(idx)).map_err(|raw| format!("invalid peak_load_kw '{raw}'"))?,
        None => None,
    };
    let is_anomaly = columns.is_anomaly.and_then(|idx| parse_label(get(idx)));

    let attributes: BTreeMap<String, String> = columns
        .attributes
        .iter()
        .filter_map(|(idx, name)| {
            let value = record.get(*idx)?.trim();
            (!value.is_empty()).then(|| (name.clone(), value.to_string()))
        })
        .collect();

    Ok(UsageRecord {
        customer_id,
        period,
        consumption,
        peak_load_kw,
        is_anomaly,
        attributes,
    })
}

/// Customer id and period of a row that failed to parse, when those fields
/// are themselves readable.
fn rejection_keys(record: &ByteRecord, columns: &ColumnMap) -> (Option<String>, Option<Period>) {
    let field = |idx: usize| {
        record
            .get(idx)
            .and_then(|b| std::str::from_utf8(b).ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    (
        field(columns.customer_id).map(str::to_string),
        field(columns.period).and_then(|p| p.parse().ok()),
    )
}

#[async_trait::async_trait]
impl Source<UsageRecord> for UsageCsvSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send>> {
        // Blocking CSV reads inside one async task; uploads are a few hundred rows.
        let inputs = self.inputs.clone();
        let s = async_stream::stream! {
            for input in inputs {
                let name = input.name();
                let reader = match input.open() {
                    Ok(r) => r,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

                let columns = match rdr.headers() {
                    Ok(headers) => ColumnMap::resolve(headers),
                    Err(e) => Err(format!("failed to read CSV headers: {e}")),
                };
                let columns = match columns {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("{name}: {e}")));
                        return;
                    }
                };

                for result in rdr.byte_records() {
                    // Only I/O failures surface here; the reader is flexible about row length.
                    let raw = match result {
                        Ok(r) => r,
                        Err(e) => {
                            yield Err(PipelineError::Source(format!("{name}: failed to read CSV record: {e}")));
                            return;
                        }
                    };
                    let origin = RecordOrigin {
                        source: name.clone(),
                        line: raw.position().map(|p| p.line()).unwrap_or_default(),
                    };

                    let parsed = match StringRecord::from_byte_record(raw) {
                        Ok(record) => record_to_usage(&record, &columns)
                            .map_err(|reason| (rejection_keys(record.as_byte_record(), &columns), reason)),
                        Err(e) => {
                            let reason = format!("row is not valid UTF-8: {}", e.utf8_error());
                            Err((rejection_keys(&e.into_byte_record(), &columns), reason))
                        }
                    };

                    match parsed {
                        Ok(usage) => {
                            yield Ok(Envelope {
                                payload: usage,
                                received_at: SystemTime::now(),
                                origin: Some(origin),
                            });
                        }
                        Err(((customer_id, period), reason)) => {
                            metrics::counter!("usage_csv_parse_errors_total").increment(1);
                            yield Err(PipelineError::InvalidRecord(RowRejection {
                                origin: Some(origin),
                                customer_id,
                                period,
                                reason,
                            }));
                        }
                    }
                }
            }
        };

        Box::pin(s)
    }
}

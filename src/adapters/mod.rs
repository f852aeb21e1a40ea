//! Conversion of vendor payloads into the canonical [`Reading`]/[`Dataset`]
//! model.
//!
//! Each record is normalized independently: a bad record is counted and
//! dropped, never fatal on its own. A call fails only when the input is empty
//! or no record at all survives.

pub mod dexcom;

pub use dexcom::DexcomAdapter;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Dataset, MalformedRecord, Reading};

/// Failure share above which a dataset is flagged as degraded.
pub const HIGH_FAILURE_RATE: f64 = 0.5;

/// Per-call accounting. `normalized + skipped + errored == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationStats {
    pub total: usize,
    pub normalized: usize,
    /// Expected vendor quirks (absent fields, null values).
    pub skipped: usize,
    /// Unexpected anomalies (wrong types, out-of-range values).
    pub errored: usize,
}

impl NormalizationStats {
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.skipped + self.errored) as f64 / self.total as f64
    }

    /// More than half of the input was dropped. Usually means the vendor
    /// changed its format.
    pub fn is_degraded(&self) -> bool {
        self.failure_rate() > HIGH_FAILURE_RATE
    }
}

/// A successfully built dataset together with how it was built.
#[derive(Debug, Clone)]
pub struct NormalizedDataset {
    pub dataset: Dataset,
    pub stats: NormalizationStats,
}

/// Capability every CGM vendor adapter provides.
pub trait CgmAdapter {
    /// Vendor tag stored with each dataset.
    fn source(&self) -> &'static str;

    /// Vendor API or payload format version.
    fn source_version(&self) -> &'static str;

    /// Map one raw vendor record onto a [`Reading`].
    fn normalize_reading(&self, raw: &Value) -> std::result::Result<Reading, MalformedRecord>;

    /// Normalize one user's records for one UTC day.
    fn normalize_dataset(
        &self,
        user_id: &str,
        readings_date_utc: NaiveDate,
        ingested_at_utc: DateTime<Utc>,
        raw_records: &[Value],
    ) -> Result<NormalizedDataset> {
        normalize_records(self, user_id, readings_date_utc, ingested_at_utc, raw_records)
    }
}

fn normalize_records<A: CgmAdapter + ?Sized>(
    adapter: &A,
    user_id: &str,
    readings_date_utc: NaiveDate,
    ingested_at_utc: DateTime<Utc>,
    raw_records: &[Value],
) -> Result<NormalizedDataset> {
    if raw_records.is_empty() {
        return Err(Error::EmptyInput {
            user_id: user_id.to_string(),
        });
    }

    let mut readings = Vec::with_capacity(raw_records.len());
    let mut stats = NormalizationStats {
        total: raw_records.len(),
        ..Default::default()
    };

    for (idx, raw) in raw_records.iter().enumerate() {
        match adapter.normalize_reading(raw) {
            Ok(reading) => readings.push(reading),
            Err(MalformedRecord::NullValue) => {
                log::debug!("User {user_id}: skipping reading {idx}: null value");
                stats.skipped += 1;
            }
            Err(e) if e.is_expected() => {
                log::warn!("User {user_id}: skipping reading {idx}: {e}");
                stats.skipped += 1;
            }
            Err(e) => {
                log::warn!("User {user_id}: failed to normalize reading {idx}: {e}");
                stats.errored += 1;
            }
        }
    }
    stats.normalized = readings.len();

    log::info!(
        "User {user_id}: normalization complete. Total: {}, Success: {}, Skipped: {}, Errors: {}",
        stats.total,
        stats.normalized,
        stats.skipped,
        stats.errored
    );

    if readings.is_empty() {
        return Err(Error::AllRecordsInvalid {
            user_id: user_id.to_string(),
            total: stats.total,
            skipped: stats.skipped,
            errored: stats.errored,
        });
    }

    if stats.is_degraded() {
        log::warn!(
            "User {user_id}: high failure rate during normalization: {:.1}% of readings failed. \
             This may indicate a data format change.",
            stats.failure_rate() * 100.0
        );
    }

    let dataset = Dataset::new(
        user_id,
        readings_date_utc,
        ingested_at_utc,
        adapter.source(),
        adapter.source_version(),
        readings,
    )?;
    Ok(NormalizedDataset { dataset, stats })
}

/// The set of supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Dexcom(DexcomAdapter),
}

impl Adapter {
    /// Look up the adapter for a vendor tag, e.g. `"dexcom"`.
    pub fn for_source(source: &str) -> Option<Self> {
        match source.trim().to_ascii_lowercase().as_str() {
            dexcom::SOURCE => Some(Adapter::Dexcom(DexcomAdapter)),
            _ => None,
        }
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Adapter::Dexcom(DexcomAdapter)
    }
}

impl CgmAdapter for Adapter {
    fn source(&self) -> &'static str {
        match self {
            Adapter::Dexcom(a) => a.source(),
        }
    }

    fn source_version(&self) -> &'static str {
        match self {
            Adapter::Dexcom(a) => a.source_version(),
        }
    }

    fn normalize_reading(&self, raw: &Value) -> std::result::Result<Reading, MalformedRecord> {
        match self {
            Adapter::Dexcom(a) => a.normalize_reading(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 13).unwrap()
    }

    fn ingested() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 14, 6, 0, 0).unwrap()
    }

    fn egv(time: &str, value: Value) -> Value {
        json!({"systemTime": time, "displayTime": time, "value": value, "trend": "flat"})
    }

    #[test]
    fn test_empty_input_fails() {
        let err = Adapter::default()
            .normalize_dataset("u1", day(), ingested(), &[])
            .unwrap_err();
        assert!(matches!(err, Error::EmptyInput { .. }));
    }

    #[test]
    fn test_all_malformed_fails() {
        let raw = vec![
            json!({"displayTime": "2025-01-13T08:00:00", "value": null}),
            json!({"value": 120}),
            json!({"displayTime": "2025-01-13T08:10:00", "value": "high"}),
            json!(42),
        ];
        let err = Adapter::default()
            .normalize_dataset("u1", day(), ingested(), &raw)
            .unwrap_err();
        match err {
            Error::AllRecordsInvalid {
                total,
                skipped,
                errored,
                ..
            } => {
                assert_eq!(total, 4);
                assert_eq!(skipped, 2);
                assert_eq!(errored, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_partial_failure_accounting() {
        let raw = vec![
            egv("2025-01-13T08:00:00", json!(120)),
            egv("2025-01-13T08:05:00", Value::Null),
            json!({"displayTime": "2025-01-13T08:10:00"}),
            egv("2025-01-13T08:15:00", json!(-3)),
            egv("2025-01-13T08:20:00", json!("131")),
            egv("not-a-time", json!(140)),
            egv("2025-01-13T08:30:00", json!(150.5)),
        ];
        let out = Adapter::default()
            .normalize_dataset("u1", day(), ingested(), &raw)
            .unwrap();

        let s = out.stats;
        assert_eq!(s.total, 7);
        assert_eq!(s.normalized, 3);
        assert_eq!(s.skipped, 2);
        assert_eq!(s.errored, 2);
        assert_eq!(s.normalized + s.skipped + s.errored, s.total);
        assert_eq!(out.dataset.readings().len(), s.total - s.skipped - s.errored);
    }

    #[test]
    fn test_output_preserves_input_order() {
        let raw = vec![
            egv("2025-01-13T09:00:00", json!(200)),
            egv("2025-01-13T08:00:00", json!(100)),
            egv("2025-01-13T08:30:00", Value::Null),
            egv("2025-01-13T08:30:00", json!(150)),
        ];
        let out = Adapter::default()
            .normalize_dataset("u1", day(), ingested(), &raw)
            .unwrap();
        let values: Vec<f64> = out.dataset.readings().iter().map(|r| r.value()).collect();
        assert_eq!(values, vec![200.0, 100.0, 150.0]);
    }

    #[test]
    fn test_high_failure_rate_is_flagged_not_rejected() {
        let raw = vec![
            egv("2025-01-13T08:00:00", json!(120)),
            egv("2025-01-13T08:05:00", Value::Null),
            egv("2025-01-13T08:10:00", Value::Null),
        ];
        let out = Adapter::default()
            .normalize_dataset("u1", day(), ingested(), &raw)
            .unwrap();
        assert!(out.stats.is_degraded());
        assert_eq!(out.dataset.readings().len(), 1);
    }

    #[test]
    fn test_exactly_half_failed_is_not_degraded() {
        let stats = NormalizationStats {
            total: 4,
            normalized: 2,
            skipped: 1,
            errored: 1,
        };
        assert_eq!(stats.failure_rate(), 0.5);
        assert!(!stats.is_degraded());
    }

    #[test]
    fn test_dataset_metadata_comes_from_adapter() {
        let raw = vec![egv("2025-01-13T08:00:00", json!(120))];
        let out = Adapter::default()
            .normalize_dataset("u1", day(), ingested(), &raw)
            .unwrap();
        assert_eq!(out.dataset.source(), "dexcom");
        assert_eq!(out.dataset.source_version(), "v3");
        assert_eq!(out.dataset.user_id(), "u1");
        assert_eq!(out.dataset.readings_date_utc(), day());
        assert_eq!(out.dataset.ingested_at_utc(), ingested());
    }

    #[test]
    fn test_for_source() {
        assert_eq!(Adapter::for_source("dexcom"), Some(Adapter::Dexcom(DexcomAdapter)));
        assert_eq!(Adapter::for_source(" Dexcom "), Some(Adapter::Dexcom(DexcomAdapter)));
        assert_eq!(Adapter::for_source("libre"), None);
    }
}

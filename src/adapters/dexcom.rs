use serde_json::Value;

use super::CgmAdapter;
use crate::date_util::parse_local_timestamp;
use crate::models::{MalformedRecord, Reading};

pub const SOURCE: &str = "dexcom";
pub const API_VERSION: &str = "v3";

/// Adapter for Dexcom API v3 estimated glucose values.
///
/// ```json
/// {"systemTime": "2025-01-13T13:00:00", "displayTime": "2025-01-13T08:00:00",
///  "value": 120, "trend": "flat", "trendRate": 0.5}
/// ```
///
/// `displayTime` is the user's wall clock and becomes the reading timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DexcomAdapter;

impl CgmAdapter for DexcomAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn source_version(&self) -> &'static str {
        API_VERSION
    }

    fn normalize_reading(&self, raw: &Value) -> Result<Reading, MalformedRecord> {
        let record = raw.as_object().ok_or(MalformedRecord::NotAnObject)?;

        let display_time = record
            .get("displayTime")
            .ok_or(MalformedRecord::MissingField("displayTime"))?;
        let value = record
            .get("value")
            .ok_or(MalformedRecord::MissingField("value"))?;
        if value.is_null() {
            return Err(MalformedRecord::NullValue);
        }

        let timestamp = display_time
            .as_str()
            .and_then(parse_local_timestamp)
            .ok_or_else(|| MalformedRecord::InvalidTimestamp(display_time.to_string()))?;

        Reading::new(timestamp, coerce_value(value)?)
    }
}

fn coerce_value(value: &Value) -> Result<f64, MalformedRecord> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| MalformedRecord::InvalidValue(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| MalformedRecord::InvalidValue(format!("{s:?}"))),
        other => Err(MalformedRecord::InvalidValue(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_normalize_reading() {
        let raw = json!({
            "systemTime": "2025-01-13T13:00:00",
            "displayTime": "2025-01-13T08:00:00",
            "value": 120,
            "trend": "flat",
            "trendRate": 0.5
        });
        let reading = DexcomAdapter.normalize_reading(&raw).unwrap();
        assert_eq!(reading.value(), 120.0);
        assert_eq!(reading.unit(), "mg/dL");
        assert_eq!(
            reading.timestamp_local(),
            NaiveDate::from_ymd_opt(2025, 1, 13)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_missing_fields_are_expected_quirks() {
        let no_time = DexcomAdapter.normalize_reading(&json!({"value": 120})).unwrap_err();
        assert_eq!(no_time, MalformedRecord::MissingField("displayTime"));
        assert!(no_time.is_expected());

        let no_value = DexcomAdapter
            .normalize_reading(&json!({"displayTime": "2025-01-13T08:00:00"}))
            .unwrap_err();
        assert_eq!(no_value, MalformedRecord::MissingField("value"));

        let null_value = DexcomAdapter
            .normalize_reading(&json!({"displayTime": "2025-01-13T08:00:00", "value": null}))
            .unwrap_err();
        assert_eq!(null_value, MalformedRecord::NullValue);
    }

    #[test]
    fn test_uncoercible_values_are_anomalies() {
        for bad in [json!("HIGH"), json!(true), json!([120]), json!({"v": 1}), json!(-1)] {
            let err = DexcomAdapter
                .normalize_reading(&json!({"displayTime": "2025-01-13T08:00:00", "value": bad.clone()}))
                .unwrap_err();
            assert!(matches!(err, MalformedRecord::InvalidValue(_)), "{bad} gave {err:?}");
            assert!(!err.is_expected());
        }
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let reading = DexcomAdapter
            .normalize_reading(&json!({"displayTime": "2025-01-13T08:00:00", "value": " 98.5 "}))
            .unwrap();
        assert_eq!(reading.value(), 98.5);
    }

    #[test]
    fn test_bad_timestamp() {
        let err = DexcomAdapter
            .normalize_reading(&json!({"displayTime": 1736755200, "value": 100}))
            .unwrap_err();
        assert!(matches!(err, MalformedRecord::InvalidTimestamp(_)));

        let null_time = DexcomAdapter
            .normalize_reading(&json!({"displayTime": null, "value": 100}))
            .unwrap_err();
        assert!(matches!(null_time, MalformedRecord::InvalidTimestamp(_)));
    }

    #[test]
    fn test_non_object_record() {
        assert_eq!(
            DexcomAdapter.normalize_reading(&json!("120")).unwrap_err(),
            MalformedRecord::NotAnObject
        );
    }
}

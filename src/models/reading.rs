use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::date_util::date_key;
use crate::error::{Error, Result};

pub const DEFAULT_UNIT: &str = "mg/dL";

/// Why a single vendor record could not become a [`Reading`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("missing '{0}' field")]
    MissingField(&'static str),

    #[error("null value")]
    NullValue,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("record is not an object")]
    NotAnObject,
}

impl MalformedRecord {
    /// Absent fields and null values are known vendor behavior (sensor
    /// warm-up, calibration gaps). Everything else is an anomaly.
    pub fn is_expected(&self) -> bool {
        matches!(self, MalformedRecord::MissingField(_) | MalformedRecord::NullValue)
    }
}

/// A single glucose observation in the user's wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReadingDocument")]
pub struct Reading {
    #[serde(rename = "timestamp")]
    timestamp_local: NaiveDateTime,
    value: f64,
    unit: String,
}

impl Reading {
    /// Build a reading in mg/dL. Fails unless `value` is finite and non-negative.
    pub fn new(timestamp_local: NaiveDateTime, value: f64) -> std::result::Result<Self, MalformedRecord> {
        Self::with_unit(timestamp_local, value, DEFAULT_UNIT)
    }

    pub fn with_unit(
        timestamp_local: NaiveDateTime,
        value: f64,
        unit: &str,
    ) -> std::result::Result<Self, MalformedRecord> {
        if !value.is_finite() {
            return Err(MalformedRecord::InvalidValue(format!("{value} is not finite")));
        }
        if value < 0.0 {
            return Err(MalformedRecord::InvalidValue(format!("{value} is negative")));
        }
        Ok(Self {
            timestamp_local,
            value,
            unit: unit.to_string(),
        })
    }

    pub fn timestamp_local(&self) -> NaiveDateTime {
        self.timestamp_local
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }
}

#[derive(Deserialize)]
struct ReadingDocument {
    #[serde(alias = "timestamp_local")]
    timestamp: NaiveDateTime,
    value: f64,
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

impl TryFrom<ReadingDocument> for Reading {
    type Error = MalformedRecord;

    fn try_from(doc: ReadingDocument) -> std::result::Result<Self, Self::Error> {
        Reading::with_unit(doc.timestamp, doc.value, &doc.unit)
    }
}

/// Blob key for one user's normalized readings on one UTC day.
pub fn dataset_key(user_id: &str, readings_date: NaiveDate) -> String {
    format!(
        "normalized/user_id={user_id}/readings_date={}/readings.json",
        date_key(readings_date)
    )
}

/// One user's normalized readings for one UTC calendar day.
///
/// Never empty. Built once by an adapter and not modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "DatasetDocument", try_from = "DatasetDocument")]
pub struct Dataset {
    user_id: String,
    readings_date_utc: NaiveDate,
    ingested_at_utc: DateTime<Utc>,
    source: String,
    source_version: String,
    readings: Vec<Reading>,
}

impl Dataset {
    pub fn new(
        user_id: &str,
        readings_date_utc: NaiveDate,
        ingested_at_utc: DateTime<Utc>,
        source: &str,
        source_version: &str,
        readings: Vec<Reading>,
    ) -> Result<Self> {
        if readings.is_empty() {
            return Err(Error::NoReadings {
                user_id: user_id.to_string(),
            });
        }
        Ok(Self {
            user_id: user_id.to_string(),
            readings_date_utc,
            ingested_at_utc,
            source: source.to_string(),
            source_version: source_version.to_string(),
            readings,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn readings_date_utc(&self) -> NaiveDate {
        self.readings_date_utc
    }

    pub fn ingested_at_utc(&self) -> DateTime<Utc> {
        self.ingested_at_utc
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_version(&self) -> &str {
        &self.source_version
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }

    pub fn blob_key(&self) -> String {
        dataset_key(&self.user_id, self.readings_date_utc)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetMetadata {
    total_readings: usize,
    #[serde(default = "unknown")]
    source: String,
    #[serde(default = "unknown")]
    source_version: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetDocument {
    user_id: String,
    readings_date_utc: NaiveDate,
    ingested_at_utc: DateTime<Utc>,
    readings: Vec<Reading>,
    metadata: DatasetMetadata,
}

impl From<Dataset> for DatasetDocument {
    fn from(ds: Dataset) -> Self {
        Self {
            metadata: DatasetMetadata {
                total_readings: ds.readings.len(),
                source: ds.source,
                source_version: ds.source_version,
            },
            user_id: ds.user_id,
            readings_date_utc: ds.readings_date_utc,
            ingested_at_utc: ds.ingested_at_utc,
            readings: ds.readings,
        }
    }
}

impl TryFrom<DatasetDocument> for Dataset {
    type Error = String;

    fn try_from(doc: DatasetDocument) -> std::result::Result<Self, Self::Error> {
        if doc.readings.is_empty() {
            return Err(format!(
                "dataset for user {} on {} has no readings",
                doc.user_id, doc.readings_date_utc
            ));
        }
        Ok(Self {
            user_id: doc.user_id,
            readings_date_utc: doc.readings_date_utc,
            ingested_at_utc: doc.ingested_at_utc,
            source: doc.metadata.source,
            source_version: doc.metadata.source_version,
            readings: doc.readings,
        })
    }
}

use serde::{Deserialize, Serialize};

/// Mutually exclusive glucose range buckets, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseCategory {
    VeryLow,
    Low,
    Target,
    High,
    VeryHigh,
}

impl GlucoseCategory {
    pub const ALL: [GlucoseCategory; 5] = [
        GlucoseCategory::VeryLow,
        GlucoseCategory::Low,
        GlucoseCategory::Target,
        GlucoseCategory::High,
        GlucoseCategory::VeryHigh,
    ];
}

/// Reading counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub very_low: u64,
    pub low: u64,
    pub target: u64,
    pub high: u64,
    pub very_high: u64,
}

impl CategoryCounts {
    pub fn add(&mut self, category: GlucoseCategory) {
        match category {
            GlucoseCategory::VeryLow => self.very_low += 1,
            GlucoseCategory::Low => self.low += 1,
            GlucoseCategory::Target => self.target += 1,
            GlucoseCategory::High => self.high += 1,
            GlucoseCategory::VeryHigh => self.very_high += 1,
        }
    }

    pub fn get(&self, category: GlucoseCategory) -> u64 {
        match category {
            GlucoseCategory::VeryLow => self.very_low,
            GlucoseCategory::Low => self.low,
            GlucoseCategory::Target => self.target,
            GlucoseCategory::High => self.high,
            GlucoseCategory::VeryHigh => self.very_high,
        }
    }

    pub fn total(&self) -> u64 {
        self.very_low + self.low + self.target + self.high + self.very_high
    }
}

/// Clinical summary of a window of readings. Percentages carry one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub avg_glucose: f64,
    pub time_in_range_pct: f64,
    /// Share of expected 5-minute readings actually present, capped at 100.
    pub cgm_active_pct: f64,
    pub very_low_pct: f64,
    pub low_pct: f64,
    pub target_pct: f64,
    pub high_pct: f64,
    pub very_high_pct: f64,
    pub total_readings: u64,
}

impl Aggregate {
    pub fn category_pct(&self, category: GlucoseCategory) -> f64 {
        match category {
            GlucoseCategory::VeryLow => self.very_low_pct,
            GlucoseCategory::Low => self.low_pct,
            GlucoseCategory::Target => self.target_pct,
            GlucoseCategory::High => self.high_pct,
            GlucoseCategory::VeryHigh => self.very_high_pct,
        }
    }

    /// Glucose management indicator, derived from the average. `None` when
    /// the average is not positive.
    pub fn gmi(&self) -> Option<f64> {
        super::gmi(self.avg_glucose)
    }
}

pub mod types;

pub use types::*;

use crate::date_util::round1;
use crate::models::Reading;

// Range thresholds in mg/dL.
pub const VERY_LOW_THRESHOLD: f64 = 54.0;
pub const LOW_THRESHOLD: f64 = 70.0;
pub const HIGH_THRESHOLD: f64 = 180.0;
pub const VERY_HIGH_THRESHOLD: f64 = 250.0;

/// A CGM reports every 5 minutes.
pub const READINGS_PER_DAY: u64 = 288;

/// Place a value in its range bucket. The target band is closed on both
/// ends; 250 is still "high".
pub fn categorize(value: f64) -> GlucoseCategory {
    if value < VERY_LOW_THRESHOLD {
        GlucoseCategory::VeryLow
    } else if value < LOW_THRESHOLD {
        GlucoseCategory::Low
    } else if value <= HIGH_THRESHOLD {
        GlucoseCategory::Target
    } else if value <= VERY_HIGH_THRESHOLD {
        GlucoseCategory::High
    } else {
        GlucoseCategory::VeryHigh
    }
}

/// Count readings per category.
pub fn category_counts(readings: &[Reading]) -> CategoryCounts {
    let mut counts = CategoryCounts::default();
    for r in readings {
        counts.add(categorize(r.value()));
    }
    counts
}

/// Summarize a window of readings spanning `num_days` days.
///
/// Returns `None` for an empty window. The result does not depend on the
/// order of `readings`.
pub fn aggregate(readings: &[Reading], num_days: u32) -> Option<Aggregate> {
    if readings.is_empty() {
        return None;
    }

    // Summing in sorted order keeps the mean bit-identical under reordering.
    let mut values: Vec<f64> = readings.iter().map(|r| r.value()).collect();
    values.sort_by(f64::total_cmp);
    let total = values.len() as u64;
    let avg = values.iter().sum::<f64>() / total as f64;

    let counts = category_counts(readings);
    let pct = |n: u64| round1(n as f64 / total as f64 * 100.0);

    let expected = u64::from(num_days) * READINGS_PER_DAY;
    let cgm_active_pct = if expected > 0 {
        round1((total as f64 / expected as f64 * 100.0).min(100.0))
    } else {
        0.0
    };

    let target_pct = pct(counts.target);
    Some(Aggregate {
        avg_glucose: round1(avg),
        time_in_range_pct: target_pct,
        cgm_active_pct,
        very_low_pct: pct(counts.very_low),
        low_pct: pct(counts.low),
        target_pct,
        high_pct: pct(counts.high),
        very_high_pct: pct(counts.very_high),
        total_readings: total,
    })
}

/// `3.31 + 0.02392 × avg_glucose`, defined only for a positive average.
pub fn gmi(avg_glucose: f64) -> Option<f64> {
    if avg_glucose > 0.0 {
        Some(3.31 + 0.02392 * avg_glucose)
    } else {
        None
    }
}

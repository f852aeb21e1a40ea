//! Human-readable weekly statements with week-over-week trend markers.

use chrono::NaiveDate;

use crate::date_util::{date_key, round1};
use crate::metrics::Aggregate;

/// Smallest average-glucose change worth reporting, in mg/dL.
pub const SIGNIFICANT_CHANGE_MGDL: f64 = 10.0;
/// Smallest change worth reporting for any percentage metric, in points.
pub const SIGNIFICANT_CHANGE_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    MgDl,
    Percent,
}

impl Unit {
    fn threshold(self) -> f64 {
        match self {
            Unit::MgDl => SIGNIFICANT_CHANGE_MGDL,
            Unit::Percent => SIGNIFICANT_CHANGE_PCT,
        }
    }

    fn format(self, value: f64) -> String {
        match self {
            Unit::MgDl => format!("{:.0} mg/dL", value.round()),
            Unit::Percent => format!("{value:.1}%"),
        }
    }
}

struct Metric {
    label: &'static str,
    unit: Unit,
    value: fn(&Aggregate) -> f64,
}

/// Reported metrics, in output order.
const METRICS: [Metric; 7] = [
    Metric {
        label: "Average glucose",
        unit: Unit::MgDl,
        value: |a| a.avg_glucose,
    },
    Metric {
        label: "Time in range (70-180)",
        unit: Unit::Percent,
        value: |a| a.time_in_range_pct,
    },
    Metric {
        label: "CGM active",
        unit: Unit::Percent,
        value: |a| a.cgm_active_pct,
    },
    Metric {
        label: "Very high (>250)",
        unit: Unit::Percent,
        value: |a| a.very_high_pct,
    },
    Metric {
        label: "High (180-250)",
        unit: Unit::Percent,
        value: |a| a.high_pct,
    },
    Metric {
        label: "Low (54-70)",
        unit: Unit::Percent,
        value: |a| a.low_pct,
    },
    Metric {
        label: "Very low (<54)",
        unit: Unit::Percent,
        value: |a| a.very_low_pct,
    },
];

/// A significant week-over-week change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    /// `current - previous`, rounded to one decimal.
    pub delta: f64,
}

impl Trend {
    /// Returns a trend only when `|delta|` reaches `threshold`.
    pub fn significant(current: f64, previous: f64, threshold: f64) -> Option<Self> {
        // Inputs carry one decimal; rounding the difference keeps the
        // threshold comparison exact.
        let delta = round1(current - previous);
        (delta.abs() >= threshold).then_some(Trend { delta })
    }

    pub fn arrow(&self) -> &'static str {
        if self.delta > 0.0 {
            "↑"
        } else {
            "↓"
        }
    }
}

/// Header line naming the period, inclusive of both endpoints.
pub fn header(period_start: NaiveDate, period_end: NaiveDate) -> String {
    let days = (period_end - period_start).num_days() + 1;
    format!(
        "Glucose summary for {} through {} ({days} days)",
        date_key(period_start),
        date_key(period_end)
    )
}

/// Build the ordered insight lines for a period.
///
/// Without a `previous` aggregate every metric line is unannotated.
pub fn generate(
    current: &Aggregate,
    period_start: NaiveDate,
    period_end: NaiveDate,
    previous: Option<&Aggregate>,
) -> Vec<String> {
    let mut insights = Vec::with_capacity(METRICS.len() + 1);
    insights.push(header(period_start, period_end));

    for metric in &METRICS {
        let value = (metric.value)(current);
        let mut line = format!("{}: {}", metric.label, metric.unit.format(value));
        if let Some(prev) = previous {
            let trend = Trend::significant(value, (metric.value)(prev), metric.unit.threshold());
            if let Some(t) = trend {
                line.push_str(&format!(" ({}{:.1} from last week)", t.arrow(), t.delta.abs()));
            }
        }
        insights.push(line);
    }
    insights
}

use crate::date_util::long_date;
use crate::models::{Report, UserProfile};

use super::OutgoingEmail;

pub fn subject(report: &Report) -> String {
    format!("Your Weekly Glucose Report - {}", long_date(report.period_end))
}

/// Render the plain-text weekly report email for `user`.
pub fn render_weekly_report(
    user: &UserProfile,
    report: &Report,
    sender: &str,
    frontend_base_url: &str,
) -> OutgoingEmail {
    let agg = &report.aggregates;
    let mut lines = vec![
        "Your Weekly Glucose Report".to_string(),
        String::new(),
        format!("Hi {},", user.first_name),
        String::new(),
        format!(
            "Here's your glucose summary for {} to {}.",
            long_date(report.period_start),
            long_date(report.period_end)
        ),
        String::new(),
        "KEY METRICS".to_string(),
        "-----------".to_string(),
        format!("Average Glucose: {:.0} mg/dL", agg.avg_glucose),
        format!("Time in Range: {:.1}%", agg.time_in_range_pct),
    ];
    if let Some(gmi) = agg.gmi() {
        lines.push(format!("GMI: {gmi:.1}%"));
    }
    lines.extend([String::new(), "KEY INSIGHTS".to_string(), "------------".to_string()]);
    lines.extend(report.insights.iter().map(|insight| format!("• {insight}")));
    lines.extend([
        String::new(),
        "---".to_string(),
        "You're receiving this because you signed up for weekly glucose reports.".to_string(),
        format!(
            "Update your preferences: {}/settings",
            frontend_base_url.trim_end_matches('/')
        ),
    ]);

    let mut body = lines.join("\n");
    body.push('\n');

    OutgoingEmail {
        sender: sender.to_string(),
        recipient: user.email.clone(),
        subject: subject(report),
        body,
    }
}

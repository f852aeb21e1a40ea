use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::Stage;
use crate::config::REPORT_WINDOW_DAYS;
use crate::error::{Error, Result};
use crate::insights;
use crate::metrics;
use crate::models::messages::{decode, encode};
use crate::models::{
    report_key, GraphPoint, NotifyMessage, ProcessMessage, Reading, Report, ReportType,
    INSIGHTS_VERSION,
};
use crate::queue::{QueueName, WorkQueue};
use crate::storage::{BlobStore, ReportStore};

/// Builds one user's weekly report from the stored daily datasets.
pub struct ProcessWorker<'a, B, R, Q> {
    blobs: &'a B,
    reports: &'a R,
    queue: &'a Q,
    as_of: NaiveDate,
    window_days: u32,
    now: DateTime<Utc>,
}

impl<'a, B, R, Q> ProcessWorker<'a, B, R, Q>
where
    B: BlobStore,
    R: ReportStore,
    Q: WorkQueue,
{
    /// A worker reporting on the seven days before `now`'s UTC date.
    pub fn new(blobs: &'a B, reports: &'a R, queue: &'a Q, now: DateTime<Utc>) -> Self {
        Self {
            blobs,
            reports,
            queue,
            as_of: now.date_naive(),
            window_days: REPORT_WINDOW_DAYS,
            now,
        }
    }

    /// Report on the days before `as_of` instead.
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days.max(1);
        self
    }

    /// Days read for a report: `as_of - window_days ..= as_of - 1`.
    pub fn window(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (1..=i64::from(self.window_days))
            .rev()
            .map(move |back| self.as_of - Duration::days(back))
    }

    async fn fetch_window(&self, user_id: &str) -> Result<Vec<Reading>> {
        let mut readings = Vec::new();
        let mut days_found = 0;
        for date in self.window() {
            match self.blobs.get_dataset(user_id, date).await? {
                Some(dataset) => {
                    days_found += 1;
                    readings.extend(dataset.into_readings());
                }
                None => log::debug!("No data found for user {user_id} on {date}"),
            }
        }
        log::info!(
            "Fetched {} readings from {days_found} day(s) for user {user_id}",
            readings.len()
        );
        Ok(readings)
    }

    /// Previous week's aggregates, if a report exists. Lookup failures only
    /// cost the trend annotations.
    async fn previous_aggregates(
        &self,
        user_id: &str,
        period_end: NaiveDate,
    ) -> Option<metrics::Aggregate> {
        let key = report_key(period_end - Duration::days(7), ReportType::Weekly);
        match self.reports.get_report(user_id, &key).await {
            Ok(report) => report.map(|r| r.aggregates),
            Err(e) => {
                log::warn!("Could not fetch previous week aggregates for user {user_id}: {e}");
                None
            }
        }
    }

    pub async fn process_user(&self, user_id: &str) -> Result<Report> {
        let mut readings = self.fetch_window(user_id).await?;
        readings.sort_by_key(|r| r.timestamp_local());

        let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
            return Err(Error::NoReadings {
                user_id: user_id.to_string(),
            });
        };
        let period_start = first.timestamp_local().date();
        let period_end = last.timestamp_local().date();
        let days_included = u32::try_from((period_end - period_start).num_days() + 1)
            .map_err(|e| Error::Other(format!("invalid reporting period: {e}")))?;

        let aggregates = metrics::aggregate(&readings, days_included).ok_or_else(|| {
            Error::NoReadings {
                user_id: user_id.to_string(),
            }
        })?;
        let graph_data = readings
            .iter()
            .map(|r| GraphPoint {
                timestamp: r.timestamp_local(),
                value: r.value(),
            })
            .collect();

        let previous = self.previous_aggregates(user_id, period_end).await;
        let insights = insights::generate(&aggregates, period_start, period_end, previous.as_ref());

        let report = Report {
            user_id: user_id.to_string(),
            report_key: report_key(period_end, ReportType::Weekly),
            report_type: ReportType::Weekly,
            period_start,
            period_end,
            days_included,
            aggregates,
            graph_data,
            insights,
            insights_version: INSIGHTS_VERSION.to_string(),
            created_at: self.now,
        };
        self.reports.put_report(&report).await?;
        log::info!(
            "Stored report for user {user_id}, report_key: {} ({days_included} days)",
            report.report_key
        );

        let notify = NotifyMessage {
            user_id: user_id.to_string(),
            report_key: report.report_key.clone(),
        };
        self.queue
            .send(QueueName::Notification, &encode(&notify)?)
            .await?;
        Ok(report)
    }
}

impl<B, R, Q> Stage for ProcessWorker<'_, B, R, Q>
where
    B: BlobStore,
    R: ReportStore,
    Q: WorkQueue,
{
    const QUEUE: QueueName = QueueName::Processing;

    async fn handle(&self, body: &str) -> Result<()> {
        let message: ProcessMessage = decode(body)?;
        log::info!("Processing data for user: {}", message.user_id);
        self.process_user(&message.user_id).await.map(|_| ())
    }
}

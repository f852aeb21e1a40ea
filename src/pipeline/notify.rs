use super::Stage;
use crate::email::{template, EmailSink, OutgoingEmail};
use crate::error::{Error, Result};
use crate::models::messages::decode;
use crate::models::NotifyMessage;
use crate::queue::QueueName;
use crate::storage::{ReportStore, UserDirectory};

/// Renders a stored report into an email and hands it to the sink.
pub struct NotifyWorker<'a, U, R, E> {
    users: &'a U,
    reports: &'a R,
    sink: &'a E,
    sender: &'a str,
    frontend_base_url: &'a str,
}

impl<'a, U, R, E> NotifyWorker<'a, U, R, E>
where
    U: UserDirectory,
    R: ReportStore,
    E: EmailSink,
{
    pub fn new(
        users: &'a U,
        reports: &'a R,
        sink: &'a E,
        sender: &'a str,
        frontend_base_url: &'a str,
    ) -> Self {
        Self {
            users,
            reports,
            sink,
            sender,
            frontend_base_url,
        }
    }

    pub async fn notify(&self, message: &NotifyMessage) -> Result<OutgoingEmail> {
        let NotifyMessage { user_id, report_key } = message;
        log::info!("Processing email for user: {user_id}, report: {report_key}");

        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        let report = self
            .reports
            .get_report(user_id, report_key)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("report {report_key} for user {user_id}"))
            })?;

        let email =
            template::render_weekly_report(&user, &report, self.sender, self.frontend_base_url);
        self.sink.send(&email).await?;
        log::info!("Sent weekly report email to {} for user {user_id}", email.recipient);
        Ok(email)
    }
}

impl<U, R, E> Stage for NotifyWorker<'_, U, R, E>
where
    U: UserDirectory,
    R: ReportStore,
    E: EmailSink,
{
    const QUEUE: QueueName = QueueName::Notification;

    async fn handle(&self, body: &str) -> Result<()> {
        let message: NotifyMessage = decode(body)?;
        self.notify(&message).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::LogSink;
    use crate::metrics::Aggregate;
    use crate::models::{report_key, Report, ReportType, UserProfile, INSIGHTS_VERSION};
    use crate::storage::{repository, Database};
    use chrono::{NaiveDate, TimeZone, Utc};

    async fn seeded() -> Database {
        let db = Database::open_memory().await.unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 12).unwrap();
        let report = Report {
            user_id: "u1".into(),
            report_key: report_key(end, ReportType::Weekly),
            report_type: ReportType::Weekly,
            period_start: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            period_end: end,
            days_included: 7,
            aggregates: Aggregate {
                avg_glucose: 147.0,
                time_in_range_pct: 40.0,
                cgm_active_pct: 90.0,
                very_low_pct: 0.0,
                low_pct: 20.0,
                target_pct: 40.0,
                high_pct: 20.0,
                very_high_pct: 20.0,
                total_readings: 1814,
            },
            graph_data: vec![],
            insights: vec!["Average glucose: 147 mg/dL".into()],
            insights_version: INSIGHTS_VERSION.into(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 13, 6, 0, 0).unwrap(),
        };
        db.writer()
            .call(move |conn| {
                repository::upsert_user(
                    conn,
                    &UserProfile {
                        user_id: "u1".into(),
                        email: "sam@example.com".into(),
                        first_name: "Sam".into(),
                        is_active: true,
                    },
                )?;
                repository::put_report(conn, &report)
            })
            .await
            .unwrap();
        db
    }

    fn msg(user_id: &str, key: &str) -> NotifyMessage {
        NotifyMessage {
            user_id: user_id.into(),
            report_key: key.into(),
        }
    }

    #[tokio::test]
    async fn test_notify_writes_outbox() {
        let db = seeded().await;
        let worker = NotifyWorker::new(&db, &db, &db, "reports@example.com", "http://localhost:3000");
        let email = worker.notify(&msg("u1", "2025-01-12#weekly")).await.unwrap();
        assert_eq!(email.subject, "Your Weekly Glucose Report - January 12, 2025");

        let outbox = db
            .reader()
            .call(|conn| repository::list_outbox(conn, 10))
            .await
            .unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].recipient, "sam@example.com");
        assert!(outbox[0].body.contains("• Average glucose: 147 mg/dL"));
    }

    #[tokio::test]
    async fn test_missing_user_or_report_is_fatal() {
        let db = seeded().await;
        let worker = NotifyWorker::new(&db, &db, &LogSink, "s@example.com", "http://localhost:3000");

        let err = worker.notify(&msg("ghost", "2025-01-12#weekly")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!err.is_retryable());

        let err = worker.notify(&msg("u1", "2024-12-29#weekly")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_handle_decodes_body() {
        let db = seeded().await;
        let worker = NotifyWorker::new(&db, &db, &LogSink, "s@example.com", "http://localhost:3000");
        worker
            .handle(r#"{"user_id":"u1","report_key":"2025-01-12#weekly"}"#)
            .await
            .unwrap();
        assert!(worker.handle("not json").await.is_err());
    }
}

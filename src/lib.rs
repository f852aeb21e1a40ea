pub mod adapters;
pub mod config;
pub mod date_util;
pub mod email;
pub mod error;
pub mod insights;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod tokens;
pub mod vendor;

pub use adapters::{Adapter, CgmAdapter, NormalizationStats, NormalizedDataset};
pub use config::Settings;
pub use error::{Error, ErrorKind, Result};
pub use metrics::Aggregate;
pub use models::{Credentials, Dataset, Reading, Report, UserProfile};
pub use pipeline::{CoordinatorReport, DrainMode, DrainReport};
pub use queue::QueueName;
pub use storage::Database;
pub use vendor::{DexcomClient, VendorApi};

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{DeadLetter, StatusCounts};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use pipeline::{DrainOptions, IngestWorker, NotifyWorker, ProcessWorker};
use storage::repository;
use vendor::FetchWindow;

/// Knobs for draining one queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkOptions {
    pub batch_size: usize,
    /// Reference date. Ingestion fetches the day before it; processing
    /// reports on the week before it. Defaults to today (UTC).
    pub as_of: Option<NaiveDate>,
    pub mode: DrainMode,
}

impl Default for WorkOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            as_of: None,
            mode: DrainMode::StopOnFailure,
        }
    }
}

/// Result of one full pipeline cycle.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleReport {
    pub ingestion: CoordinatorReport,
    pub ingested: DrainReport,
    pub processing: CoordinatorReport,
    pub processed: DrainReport,
    pub notified: DrainReport,
}

/// Main entry point for the glucose pipeline.
pub struct GlucosePipeline {
    db: Database,
    settings: Settings,
}

impl GlucosePipeline {
    pub fn new(db: Database, settings: Settings) -> Self {
        Self { db, settings }
    }

    /// Open with settings resolved from the environment and `app_config`.
    pub async fn load(db: Database) -> Result<Self> {
        let settings = Settings::load(&db).await?;
        Ok(Self::new(db, settings))
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn now_for(as_of: Option<NaiveDate>) -> DateTime<Utc> {
        let now = Utc::now();
        match as_of {
            Some(date) => date.and_time(now.time()).and_utc(),
            None => now,
        }
    }

    fn drain_options(&self, options: &WorkOptions) -> DrainOptions {
        DrainOptions {
            batch_size: options.batch_size,
            max_receives: self.settings.max_receives,
            mode: options.mode,
        }
    }

    async fn reset_in_flight(&self, queue: QueueName) -> Result<()> {
        let reset = self
            .db
            .writer()
            .call(move |conn| repository::reset_in_flight(conn, queue))
            .await?;
        if reset > 0 {
            log::warn!("Returned {reset} interrupted {queue} message(s) to the queue");
        }
        Ok(())
    }

    // ── Coordinators ───────────────────────────────────────────────

    pub async fn coordinate_ingestion(&self) -> Result<CoordinatorReport> {
        pipeline::coordinate_ingestion(&self.db, &self.db).await
    }

    pub async fn coordinate_processing(&self) -> Result<CoordinatorReport> {
        pipeline::coordinate_processing(&self.db, &self.db).await
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Drain the ingestion queue against the configured Dexcom API.
    pub async fn work_ingestion(&self, options: &WorkOptions) -> Result<DrainReport> {
        let client = self.settings.dexcom_client()?;
        self.work_ingestion_with(&client, options).await
    }

    /// Drain the ingestion queue against any vendor implementation.
    pub async fn work_ingestion_with<V: VendorApi>(
        &self,
        vendor: &V,
        options: &WorkOptions,
    ) -> Result<DrainReport> {
        self.reset_in_flight(QueueName::Ingestion).await?;
        let now = Utc::now();
        let mut worker = IngestWorker::new(vendor, &self.db, &self.db, now);
        if let Some(as_of) = options.as_of {
            worker = worker.with_window(FetchWindow::day(as_of - Duration::days(1)));
        }
        pipeline::drain(&worker, &self.db, self.drain_options(options)).await
    }

    pub async fn work_processing(&self, options: &WorkOptions) -> Result<DrainReport> {
        self.reset_in_flight(QueueName::Processing).await?;
        let now = Self::now_for(options.as_of);
        let worker = ProcessWorker::new(&self.db, &self.db, &self.db, now)
            .with_window_days(self.settings.report_window_days);
        pipeline::drain(&worker, &self.db, self.drain_options(options)).await
    }

    /// Drain the notification queue into the database outbox.
    pub async fn work_notification(&self, options: &WorkOptions) -> Result<DrainReport> {
        self.work_notification_with(&self.db, options).await
    }

    pub async fn work_notification_with<E: email::EmailSink>(
        &self,
        sink: &E,
        options: &WorkOptions,
    ) -> Result<DrainReport> {
        self.reset_in_flight(QueueName::Notification).await?;
        let worker = NotifyWorker::new(
            &self.db,
            &self.db,
            sink,
            &self.settings.sender_email,
            &self.settings.frontend_base_url,
        );
        pipeline::drain(&worker, &self.db, self.drain_options(options)).await
    }

    /// One full cycle: fan out and drain ingestion, then processing, then
    /// notifications. Each queue is drained until empty.
    pub async fn run_cycle(&self, options: &WorkOptions) -> Result<CycleReport> {
        let client = self.settings.dexcom_client()?;
        self.run_cycle_with(&client, options).await
    }

    pub async fn run_cycle_with<V: VendorApi>(
        &self,
        vendor: &V,
        options: &WorkOptions,
    ) -> Result<CycleReport> {
        let options = WorkOptions {
            mode: DrainMode::UntilEmpty,
            ..*options
        };
        let ingestion = self.coordinate_ingestion().await?;
        let ingested = self.work_ingestion_with(vendor, &options).await?;
        let processing = self.coordinate_processing().await?;
        let processed = self.work_processing(&options).await?;
        let notified = self.work_notification(&options).await?;
        Ok(CycleReport {
            ingestion,
            ingested,
            processing,
            processed,
            notified,
        })
    }

    // ── Users and credentials ──────────────────────────────────────

    pub async fn user_add(&self, user_id: &str, email: &str, first_name: &str) -> Result<()> {
        let user = UserProfile {
            user_id: user_id.to_string(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            is_active: true,
        };
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::upsert_user(conn, &user))
            .await?)
    }

    pub async fn user_set_active(&self, user_id: &str, active: bool) -> Result<bool> {
        Ok(self
            .db
            .writer()
            .call({
                let user_id = user_id.to_string();
                move |conn| repository::set_user_active(conn, &user_id, active)
            })
            .await?)
    }

    pub async fn user_list(&self) -> Result<Vec<UserProfile>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_users(conn, false))
            .await?)
    }

    /// Store credentials obtained from the vendor's OAuth flow.
    pub async fn credentials_set(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
    ) -> Result<DateTime<Utc>> {
        let expires_at = date_util::checked_add_secs(Utc::now(), expires_in_secs).ok_or_else(|| {
            Error::Config(format!("token lifetime out of range: {expires_in_secs} seconds"))
        })?;
        let creds = Credentials {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
        };
        self.db
            .writer()
            .call(move |conn| repository::upsert_credentials(conn, &creds))
            .await?;
        Ok(expires_at)
    }

    pub async fn credentials_list(&self) -> Result<Vec<Credentials>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_credentials(conn))
            .await?)
    }

    // ── Reports ────────────────────────────────────────────────────

    /// A stored report; the latest one when `period_end` is `None`.
    pub async fn report(&self, user_id: &str, period_end: Option<NaiveDate>) -> Result<Option<Report>> {
        let user_id = user_id.to_string();
        Ok(match period_end {
            Some(end) => {
                let key = models::report_key(end, models::ReportType::Weekly);
                self.db
                    .reader()
                    .call(move |conn| repository::get_report(conn, &user_id, &key))
                    .await?
            }
            None => {
                self.db
                    .reader()
                    .call(move |conn| repository::latest_report(conn, &user_id))
                    .await?
            }
        })
    }

    // ── Status ─────────────────────────────────────────────────────

    pub async fn status(&self) -> Result<StatusCounts> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::status_counts(conn))
            .await?)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_dead_letters(conn))
            .await?)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await?)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if !config::is_known_key(key) {
            log::warn!("Config key {key:?} is not read by the pipeline");
        }
        Ok(self
            .db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await?)
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?)
    }
}

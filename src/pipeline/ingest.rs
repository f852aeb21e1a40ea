use chrono::{DateTime, Utc};

use super::Stage;
use crate::adapters::{Adapter, CgmAdapter, NormalizationStats};
use crate::error::Result;
use crate::models::messages::decode;
use crate::models::{Credentials, IngestMessage};
use crate::queue::QueueName;
use crate::storage::{BlobStore, CredentialStore};
use crate::tokens;
use crate::vendor::{FetchWindow, VendorApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The vendor had no records for the window; nothing was stored.
    NoData,
    /// One normalized dataset was written under `key`.
    Stored { key: String, stats: NormalizationStats },
}

/// Fetches one user's previous UTC day from the vendor and stores it
/// normalized.
pub struct IngestWorker<'a, V, C, B> {
    vendor: &'a V,
    credentials: &'a C,
    blobs: &'a B,
    adapter: Adapter,
    now: DateTime<Utc>,
    window: FetchWindow,
}

impl<'a, V, C, B> IngestWorker<'a, V, C, B>
where
    V: VendorApi,
    C: CredentialStore,
    B: BlobStore,
{
    /// A worker fetching the UTC day before `now`.
    pub fn new(vendor: &'a V, credentials: &'a C, blobs: &'a B, now: DateTime<Utc>) -> Self {
        Self {
            vendor,
            credentials,
            blobs,
            adapter: Adapter::default(),
            now,
            window: FetchWindow::previous_utc_day(now),
        }
    }

    /// Fetch a different window, e.g. to backfill a missed day.
    pub fn with_window(mut self, window: FetchWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub async fn ingest(&self, message: IngestMessage) -> Result<IngestOutcome> {
        let mut creds = Credentials::from(message);
        let user_id = creds.user_id.clone();
        log::info!("Processing data ingestion request for user: {user_id}");

        let access_token =
            tokens::usable_access_token(&mut creds, self.vendor, self.credentials, self.now).await?;
        let raw = self.vendor.fetch_readings(&access_token, &self.window).await?;
        if raw.is_empty() {
            log::warn!("No readings found for user: {user_id}");
            return Ok(IngestOutcome::NoData);
        }

        let normalized =
            self.adapter
                .normalize_dataset(&user_id, self.window.date(), self.now, &raw)?;
        let count = normalized.dataset.readings().len();
        let key = self.blobs.put_dataset(&normalized.dataset).await?;
        log::info!("Saved {count} normalized readings to {key} for user: {user_id}");

        Ok(IngestOutcome::Stored {
            key,
            stats: normalized.stats,
        })
    }
}

impl<V, C, B> Stage for IngestWorker<'_, V, C, B>
where
    V: VendorApi,
    C: CredentialStore,
    B: BlobStore,
{
    const QUEUE: QueueName = QueueName::Ingestion;

    async fn handle(&self, body: &str) -> Result<()> {
        let message: IngestMessage = decode(body)?;
        self.ingest(message).await.map(|_| ())
    }
}

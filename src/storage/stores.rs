//! Store traits implemented on top of the SQLite [`Database`].

use chrono::{DateTime, NaiveDate, Utc};

use super::{repository, BlobStore, CredentialStore, Database, ReportStore, UserDirectory};
use crate::error::{Error, Result};
use crate::models::{dataset_key, Credentials, Dataset, Report, UserProfile};

const JSON: &str = "application/json";

impl BlobStore for Database {
    async fn put_dataset(&self, dataset: &Dataset) -> Result<String> {
        let key = dataset.blob_key();
        let body = serde_json::to_string(dataset)?;
        self.writer()
            .call({
                let key = key.clone();
                move |conn| repository::put_blob(conn, &key, &body, JSON)
            })
            .await?;
        Ok(key)
    }

    async fn get_dataset(&self, user_id: &str, date: NaiveDate) -> Result<Option<Dataset>> {
        let key = dataset_key(user_id, date);
        let body = self
            .reader()
            .call({
                let key = key.clone();
                move |conn| repository::get_blob(conn, &key)
            })
            .await?;
        match body {
            Some(body) => serde_json::from_str(&body).map(Some).map_err(|e| {
                log::error!("Corrupt dataset {key}: {e}");
                Error::Serialization(e)
            }),
            None => Ok(None),
        }
    }
}

impl CredentialStore for Database {
    async fn list_credentials(&self) -> Result<Vec<Credentials>> {
        Ok(self
            .reader()
            .call(|conn| repository::list_credentials(conn))
            .await?)
    }

    async fn get_credentials(&self, user_id: &str) -> Result<Option<Credentials>> {
        Ok(self
            .reader()
            .call({
                let user_id = user_id.to_string();
                move |conn| repository::get_credentials(conn, &user_id)
            })
            .await?)
    }

    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self
            .writer()
            .call({
                let user_id = user_id.to_string();
                let access_token = access_token.to_string();
                let refresh_token = refresh_token.map(str::to_string);
                move |conn| {
                    repository::update_access_token(
                        conn,
                        &user_id,
                        &access_token,
                        refresh_token.as_deref(),
                        expires_at,
                    )
                }
            })
            .await?;
        Ok(updated > 0)
    }
}

impl ReportStore for Database {
    async fn put_report(&self, report: &Report) -> Result<()> {
        self.writer()
            .call({
                let report = report.clone();
                move |conn| repository::put_report(conn, &report)
            })
            .await?;
        Ok(())
    }

    async fn get_report(&self, user_id: &str, report_key: &str) -> Result<Option<Report>> {
        Ok(self
            .reader()
            .call({
                let user_id = user_id.to_string();
                let report_key = report_key.to_string();
                move |conn| repository::get_report(conn, &user_id, &report_key)
            })
            .await?)
    }
}

impl UserDirectory for Database {
    async fn active_users(&self) -> Result<Vec<UserProfile>> {
        Ok(self
            .reader()
            .call(|conn| repository::list_users(conn, true))
            .await?)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .reader()
            .call({
                let user_id = user_id.to_string();
                move |conn| repository::get_user(conn, &user_id)
            })
            .await?)
    }
}

//! Outgoing weekly report emails.

pub mod template;

use serde::Serialize;

use crate::error::Result;
use crate::storage::{repository, Database};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Delivery channel for rendered emails.
#[allow(async_fn_in_trait)]
pub trait EmailSink {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Writes emails to the `email_outbox` table for a separate mailer to pick up.
impl EmailSink for Database {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let id = self
            .writer()
            .call({
                let email = email.clone();
                move |conn| repository::insert_email(conn, &email)
            })
            .await?;
        log::info!("Queued email {id} to {} in outbox", email.recipient);
        Ok(())
    }
}

/// Logs emails instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EmailSink for LogSink {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        log::info!(
            "Email from {} to {}: {}\n{}",
            email.sender,
            email.recipient,
            email.subject,
            email.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            sender: "reports@example.com".into(),
            recipient: "sam@example.com".into(),
            subject: "Your Weekly Glucose Report - January 12, 2025".into(),
            body: "Hi Sam,".into(),
        }
    }

    #[tokio::test]
    async fn test_outbox_sink() {
        let db = Database::open_memory().await.unwrap();
        db.send(&email()).await.unwrap();

        let outbox = db
            .reader()
            .call(|conn| repository::list_outbox(conn, 10))
            .await
            .unwrap();
        assert_eq!(outbox, vec![email()]);
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        LogSink.send(&email()).await.unwrap();
    }
}

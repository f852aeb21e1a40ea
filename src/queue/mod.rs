//! Work queues between pipeline stages.
//!
//! Delivery is at-least-once: a received message stays in flight until it is
//! acknowledged, released for redelivery, or dead-lettered.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::{repository, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Ingestion,
    Processing,
    Notification,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [
        QueueName::Ingestion,
        QueueName::Processing,
        QueueName::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Ingestion => "ingestion",
            QueueName::Processing => "processing",
            QueueName::Notification => "notification",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ingestion" | "ingest" => Ok(QueueName::Ingestion),
            "processing" | "process" => Ok(QueueName::Processing),
            "notification" | "notify" => Ok(QueueName::Notification),
            other => Err(Error::Config(format!("unknown queue: {other}"))),
        }
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: i64,
    pub body: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

#[allow(async_fn_in_trait)]
pub trait WorkQueue {
    async fn send(&self, queue: QueueName, body: &str) -> Result<i64>;

    /// Claim up to `max` messages.
    async fn receive(&self, queue: QueueName, max: usize) -> Result<Vec<QueueMessage>>;

    /// Remove a processed message.
    async fn ack(&self, id: i64) -> Result<()>;

    /// Make a message available for redelivery.
    async fn release(&self, id: i64, error: Option<&str>) -> Result<()>;

    /// Park a message that will not be retried.
    async fn dead_letter(&self, id: i64, error: &str) -> Result<()>;
}

impl WorkQueue for Database {
    async fn send(&self, queue: QueueName, body: &str) -> Result<i64> {
        Ok(self
            .writer()
            .call({
                let body = body.to_string();
                move |conn| repository::enqueue(conn, queue, &body)
            })
            .await?)
    }

    async fn receive(&self, queue: QueueName, max: usize) -> Result<Vec<QueueMessage>> {
        Ok(self
            .writer()
            .call(move |conn| repository::receive(conn, queue, max))
            .await?)
    }

    async fn ack(&self, id: i64) -> Result<()> {
        Ok(self
            .writer()
            .call(move |conn| repository::ack(conn, id))
            .await?)
    }

    async fn release(&self, id: i64, error: Option<&str>) -> Result<()> {
        Ok(self
            .writer()
            .call({
                let error = error.map(str::to_string);
                move |conn| repository::release(conn, id, error.as_deref())
            })
            .await?)
    }

    async fn dead_letter(&self, id: i64, error: &str) -> Result<()> {
        Ok(self
            .writer()
            .call({
                let error = error.to_string();
                move |conn| repository::dead_letter(conn, id, &error)
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_parse() {
        assert_eq!("ingest".parse::<QueueName>().unwrap(), QueueName::Ingestion);
        assert_eq!("processing".parse::<QueueName>().unwrap(), QueueName::Processing);
        assert_eq!("notify".parse::<QueueName>().unwrap(), QueueName::Notification);
        assert!("email".parse::<QueueName>().is_err());
        assert_eq!(QueueName::Notification.to_string(), "notification");
    }

    #[tokio::test]
    async fn test_send_receive_ack() {
        let db = Database::open_memory().await.unwrap();
        let id = db.send(QueueName::Ingestion, "{}").await.unwrap();

        let batch = db.receive(QueueName::Ingestion, 5).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        db.ack(id).await.unwrap();
        db.release(id, None).await.unwrap();
        assert!(db.receive(QueueName::Ingestion, 5).await.unwrap().is_empty());
    }
}

//! The three pipeline stages and the plumbing that feeds them queue messages.
//!
//! Every stage turns one message into one stored artifact and overwrites on
//! redelivery. Errors are never swallowed: the first failure ends the batch
//! and the queue decides between redelivery and dead-lettering from
//! [`Error::kind`].

pub mod coordinator;
pub mod ingest;
pub mod notify;
pub mod process;

pub use coordinator::{coordinate_ingestion, coordinate_processing, CoordinatorReport};
pub use ingest::{IngestOutcome, IngestWorker};
pub use notify::NotifyWorker;
pub use process::ProcessWorker;

use std::fmt;

use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};
use crate::queue::{QueueMessage, QueueName, WorkQueue};

/// A worker that consumes one queue.
#[allow(async_fn_in_trait)]
pub trait Stage {
    const QUEUE: QueueName;

    /// Handle one raw message body.
    async fn handle(&self, body: &str) -> Result<()>;
}

/// The message that aborted a batch.
#[derive(Debug)]
pub struct BatchFailure {
    pub message_id: i64,
    pub error: Error,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message {} failed: {}", self.message_id, self.error)
    }
}

impl std::error::Error for BatchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Handle `messages` in order, stopping at the first error. Returns the number
/// handled.
pub async fn process_batch<S: Stage>(
    stage: &S,
    messages: &[QueueMessage],
) -> std::result::Result<usize, BatchFailure> {
    for msg in messages {
        if let Err(error) = stage.handle(&msg.body).await {
            log::error!("{} message {} failed: {error}", S::QUEUE, msg.id);
            return Err(BatchFailure {
                message_id: msg.id,
                error,
            });
        }
    }
    Ok(messages.len())
}

/// How a drain reacts to a failed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Return after the first failed batch.
    StopOnFailure,
    /// Keep receiving until the queue is empty. Failing messages come back
    /// until they are dead-lettered.
    UntilEmpty,
}

#[derive(Debug, Clone, Copy)]
pub struct DrainOptions {
    pub batch_size: usize,
    pub max_receives: u32,
    pub mode: DrainMode,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub queue: String,
    pub batches: u32,
    pub acked: u64,
    pub failed_batches: u32,
    pub dead_lettered: u64,
    pub last_error: Option<String>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Receive and handle batches from the stage's queue.
///
/// A successful batch is acknowledged. A failed batch is released for
/// redelivery, except that the failing message is dead-lettered when its error
/// is fatal or it has been delivered `max_receives` times.
pub async fn drain<S, Q>(stage: &S, queue: &Q, options: DrainOptions) -> Result<DrainReport>
where
    S: Stage,
    Q: WorkQueue,
{
    let mut report = DrainReport {
        queue: S::QUEUE.to_string(),
        ..Default::default()
    };
    let batch_size = options.batch_size.max(1);

    loop {
        let batch = queue.receive(S::QUEUE, batch_size).await?;
        if batch.is_empty() {
            break;
        }
        report.batches += 1;

        match process_batch(stage, &batch).await {
            Ok(n) => {
                for msg in &batch {
                    queue.ack(msg.id).await?;
                }
                report.acked += n as u64;
            }
            Err(failure) => {
                report.failed_batches += 1;
                let error_text = failure.error.to_string();
                for msg in &batch {
                    if msg.id != failure.message_id {
                        queue.release(msg.id, None).await?;
                        continue;
                    }
                    let exhausted = msg.receive_count >= options.max_receives;
                    if failure.error.kind() == ErrorKind::Fatal || exhausted {
                        log::warn!(
                            "Dead-lettering {} message {} after {} receive(s): {error_text}",
                            S::QUEUE,
                            msg.id,
                            msg.receive_count
                        );
                        queue.dead_letter(msg.id, &error_text).await?;
                        report.dead_lettered += 1;
                    } else {
                        queue.release(msg.id, Some(&error_text)).await?;
                    }
                }
                report.last_error = Some(error_text);
                if options.mode == DrainMode::StopOnFailure {
                    break;
                }
            }
        }
    }

    log::info!(
        "Drained {} queue: {} batch(es), {} acked, {} failed batch(es), {} dead-lettered",
        report.queue,
        report.batches,
        report.acked,
        report.failed_batches,
        report.dead_lettered
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{repository, Database};
    use std::sync::Mutex;

    /// Fails on bodies starting with "fatal" or "retry"; records the rest.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Stage for Recorder {
        const QUEUE: QueueName = QueueName::Processing;

        async fn handle(&self, body: &str) -> Result<()> {
            if body.starts_with("fatal") {
                return Err(Error::InvalidMessage(body.to_string()));
            }
            if body.starts_with("retry") {
                return Err(Error::Database("database is locked".into()));
            }
            self.seen.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    fn msg(id: i64, body: &str) -> QueueMessage {
        QueueMessage {
            id,
            body: body.to_string(),
            receive_count: 1,
        }
    }

    fn options(mode: DrainMode) -> DrainOptions {
        DrainOptions {
            batch_size: 10,
            max_receives: 3,
            mode,
        }
    }

    async fn dead_count(db: &Database) -> u64 {
        db.reader()
            .call(|conn| repository::count_messages(conn, QueueName::Processing, "dead"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_batch_stops_at_first_error() {
        let stage = Recorder::default();
        let batch = vec![msg(1, "a"), msg(2, "fatal"), msg(3, "c")];
        let failure = process_batch(&stage, &batch).await.unwrap_err();
        assert_eq!(failure.message_id, 2);
        assert_eq!(*stage.seen.lock().unwrap(), vec!["a".to_string()]);

        let ok = process_batch(&stage, &[msg(4, "d")]).await.unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_drain_acks_clean_batches() {
        let db = Database::open_memory().await.unwrap();
        for body in ["a", "b", "c"] {
            db.send(QueueName::Processing, body).await.unwrap();
        }
        let stage = Recorder::default();
        let report = drain(
            &stage,
            &db,
            DrainOptions {
                batch_size: 2,
                ..options(DrainMode::StopOnFailure)
            },
        )
        .await
        .unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.acked, 3);
        assert!(report.is_clean());
        assert!(db.receive(QueueName::Processing, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_is_dead_lettered_and_rest_redelivered() {
        let db = Database::open_memory().await.unwrap();
        for body in ["a", "fatal", "c"] {
            db.send(QueueName::Processing, body).await.unwrap();
        }
        let stage = Recorder::default();

        let report = drain(&stage, &db, options(DrainMode::StopOnFailure)).await.unwrap();
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(dead_count(&db).await, 1);

        // "a" and "c" were released and come back on the next drain.
        let report = drain(&stage, &db, options(DrainMode::StopOnFailure)).await.unwrap();
        assert_eq!(report.acked, 2);
        assert_eq!(*stage.seen.lock().unwrap(), vec!["a", "a", "c"]);
    }

    #[tokio::test]
    async fn test_retryable_error_dead_lettered_after_max_receives() {
        let db = Database::open_memory().await.unwrap();
        db.send(QueueName::Processing, "retry").await.unwrap();
        db.send(QueueName::Processing, "ok").await.unwrap();
        let stage = Recorder::default();

        let first = drain(&stage, &db, options(DrainMode::StopOnFailure)).await.unwrap();
        assert_eq!(first.dead_lettered, 0);
        assert_eq!(dead_count(&db).await, 0);

        let report = drain(&stage, &db, options(DrainMode::UntilEmpty)).await.unwrap();
        assert_eq!(report.failed_batches, 2);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.acked, 1);
        assert_eq!(dead_count(&db).await, 1);
        assert!(db.receive(QueueName::Processing, 10).await.unwrap().is_empty());
    }
}

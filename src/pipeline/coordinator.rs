use serde::Serialize;

use crate::error::Result;
use crate::models::messages::encode;
use crate::models::{IngestMessage, ProcessMessage};
use crate::queue::{QueueName, WorkQueue};
use crate::storage::{CredentialStore, UserDirectory};

/// Outcome of one fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorReport {
    pub total_users: usize,
    pub enqueued: usize,
    pub failed: usize,
}

async fn enqueue_all<Q, T>(queue: &Q, name: QueueName, items: Vec<(String, T)>) -> CoordinatorReport
where
    Q: WorkQueue,
    T: Serialize,
{
    let mut report = CoordinatorReport {
        total_users: items.len(),
        ..Default::default()
    };
    for (user_id, message) in items {
        let sent = match encode(&message) {
            Ok(body) => queue.send(name, &body).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(_) => {
                log::debug!("Enqueued user: {user_id}");
                report.enqueued += 1;
            }
            Err(e) => {
                log::error!("Failed to enqueue user {user_id}: {e}");
                report.failed += 1;
            }
        }
    }
    report
}

/// Enqueue one ingestion message per user with stored vendor credentials.
///
/// Listing failures propagate; per-user enqueue failures are counted.
pub async fn coordinate_ingestion<C, Q>(credentials: &C, queue: &Q) -> Result<CoordinatorReport>
where
    C: CredentialStore,
    Q: WorkQueue,
{
    let creds = credentials.list_credentials().await?;
    log::info!("Found {} users with vendor credentials", creds.len());

    let items = creds
        .into_iter()
        .map(|c| (c.user_id.clone(), IngestMessage::from(c)))
        .collect();
    let report = enqueue_all(queue, QueueName::Ingestion, items).await;
    log::info!(
        "Ingestion coordinator completed: total {}, enqueued {}, failed {}",
        report.total_users,
        report.enqueued,
        report.failed
    );
    Ok(report)
}

/// Enqueue one processing message per active user.
pub async fn coordinate_processing<U, Q>(users: &U, queue: &Q) -> Result<CoordinatorReport>
where
    U: UserDirectory,
    Q: WorkQueue,
{
    let active = users.active_users().await?;
    if active.is_empty() {
        log::warn!("No active users found");
    } else {
        log::info!("Found {} active users", active.len());
    }

    let items = active
        .into_iter()
        .map(|u| {
            let msg = ProcessMessage {
                user_id: u.user_id.clone(),
            };
            (u.user_id, msg)
        })
        .collect();
    let report = enqueue_all(queue, QueueName::Processing, items).await;
    log::info!(
        "Processing coordinator completed: enqueued {}, errors {}",
        report.enqueued,
        report.failed
    );
    Ok(report)
}

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::db::{self, Db};

/// Pending deltas of one document, ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushJob {
    /// Assigned by the hub when the job is queued
    pub id: u64,
    pub document_id: String,
    pub updates: Vec<String>,
    pub content: Option<String>,
}

#[derive(Debug)]
pub enum PersistJob {
    Flush(FlushJob),
    /// Acknowledged once every job queued before it has been written
    Barrier(oneshot::Sender<()>),
}

/// Sent back to the hub once a flush job has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    pub document_id: String,
    pub job_id: u64,
}

/// Spawn the persister: a single task that writes flush jobs in arrival order
///
/// Running flushes one at a time keeps the deltas of a document ordered in
/// `document_updates`. Every job is acknowledged on the returned receiver.
/// The task exits once every sender is dropped and the queue is drained.
pub fn spawn_persister(
    db: Db,
) -> (
    mpsc::UnboundedSender<PersistJob>,
    mpsc::UnboundedReceiver<Persisted>,
    JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                PersistJob::Flush(job) => {
                    let ack = Persisted {
                        document_id: job.document_id.clone(),
                        job_id: job.id,
                    };
                    write_job(&db, job).await;
                    let _ = ack_tx.send(ack);
                }
                PersistJob::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Document persister stopped");
    });

    (tx, ack_rx, handle)
}

async fn write_job(db: &Db, job: FlushJob) {
    let count = job.updates.len();
    match db::documents::append_updates(db, &job.document_id, &job.updates, job.content.as_deref())
        .await
    {
        Ok(true) => {
            tracing::debug!("Persisted {} deltas for document {}", count, job.document_id);
        }
        Ok(false) => {
            tracing::warn!(
                "Dropped {} deltas for deleted document {}",
                count,
                job.document_id
            );
        }
        Err(e) => {
            tracing::error!(
                "Failed to persist {} deltas for document {}: {}",
                count,
                job.document_id,
                e
            );
        }
    }
}

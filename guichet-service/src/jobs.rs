//! Job dispatch: the handler seam and the worker runner.
//!
//! Handlers are registered once at startup; there is no ambient registry.
//! The runner claims jobs under a lease and only acknowledges a job when its
//! handler returns `Ok`. A handler error leaves the lease in place, so the
//! queue redelivers the job once the lease expires, bounded by the
//! configured delivery budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::db::Database;
use crate::error::ServiceResult;

/// One job type's execution logic.
///
/// The payload is only a document id; handlers re-read authoritative state
/// from the record store. A handler must be safe under redelivery: the same
/// document id may be executed more than once, including concurrently.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn execute(&self, document_id: &str) -> ServiceResult<()>;
}

/// Claims jobs from the queue and dispatches them to registered handlers
pub struct JobRunner {
    db: Arc<Database>,
    config: QueueConfig,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl JobRunner {
    pub fn new(db: Arc<Database>, config: QueueConfig) -> Self {
        Self {
            db,
            config,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for its job type. Called once at startup.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        info!(job_type, "Registered job handler");
        self.handlers.insert(job_type, handler);
    }

    /// Spawn the worker tasks and the lease reaper.
    ///
    /// Workers run until the shutdown token is cancelled; an in-flight job
    /// finishes its current attempt before the worker exits.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) {
        for worker_id in 0..self.config.workers {
            let runner = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(worker_id, "Job worker started");
                runner.worker_loop(worker_id, shutdown).await;
                info!(worker_id, "Job worker stopped");
            });
        }

        let runner = self;
        tokio::spawn(async move {
            info!("Lease reaper started");
            let interval = Duration::from_secs(runner.config.poll_interval_secs);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                runner.reap_expired_leases();
            }
            info!("Lease reaper stopped");
        });
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_one().await {
                // Claimed and dispatched a job; check for the next one right away
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to poll job queue");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval * 2) => {}
                    }
                }
            }
        }
    }

    /// Claim and dispatch at most one job. Returns whether a job was claimed.
    pub(crate) async fn run_one(&self) -> ServiceResult<bool> {
        let Some(job) = self.db.claim_next_job(self.config.lease_secs)? else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                "No handler registered for job type; parking job dead"
            );
            self.db.mark_job_dead(&job.id)?;
            return Ok(true);
        };

        debug!(
            job_id = %job.id,
            doc_id = %job.document_id,
            delivery = job.deliveries,
            "Dispatching job"
        );

        match handler.execute(&job.document_id).await {
            Ok(()) => {
                self.db.complete_job(&job.id)?;
            }
            Err(e) => {
                // Leave the lease in place: the job is redelivered after the
                // lease expires, until the delivery budget runs out.
                warn!(
                    job_id = %job.id,
                    doc_id = %job.document_id,
                    delivery = job.deliveries,
                    error = %e,
                    "Job attempt failed; awaiting lease expiry for redelivery"
                );
            }
        }

        Ok(true)
    }

    /// Requeue expired leases and record a final failure on documents whose
    /// jobs exhausted their delivery budget.
    fn reap_expired_leases(&self) {
        match self.db.release_expired_leases(self.config.max_deliveries) {
            Ok(dead_document_ids) => {
                for document_id in dead_document_ids {
                    warn!(doc_id = %document_id, "Job delivery budget exhausted, dead-lettered");
                    match self.db.fail_document(&document_id, "Processing attempts exhausted") {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(doc_id = %document_id, "Dead-lettered document already settled");
                        }
                        Err(e) => {
                            warn!(
                                doc_id = %document_id,
                                error = %e,
                                "Failed to record final failure on dead-lettered document"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to release expired job leases");
            }
        }
    }
}

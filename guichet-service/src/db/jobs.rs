//! Job queue operations.
//!
//! The queue lives in the same SQLite database as the documents it feeds.
//! Claiming is a conditional update against `state = 'queued'`, so each
//! delivery goes to at most one worker; redelivery happens only through
//! lease expiry, which preserves at-least-once semantics across crashed
//! workers. Jobs whose delivery budget is exhausted are parked `dead` and
//! kept in the table for inspection.

use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{JobState, QueuedJob};
use crate::error::{DatabaseError, ServiceResult};

const JOB_COLUMNS: &str =
    "id, job_type, document_id, state, deliveries, lease_expires_at, created_at, updated_at";

impl Database {
    /// Claim the oldest queued job under a lease.
    ///
    /// Returns `None` when the queue is empty or when another worker won the
    /// claim race; the caller just polls again either way.
    pub fn claim_next_job(&self, lease_secs: u64) -> ServiceResult<Option<QueuedJob>> {
        let conn = self.conn.lock().unwrap();

        let candidate = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = 'queued' \
                     ORDER BY created_at ASC LIMIT 1"
                ),
                [],
                |row| QueuedJob::from_row(row),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let Some(mut job) = candidate else {
            return Ok(None);
        };

        let now = Utc::now();
        let lease_expires_at = now + Duration::seconds(lease_secs as i64);

        let rows = conn
            .execute(
                "UPDATE jobs SET state = 'leased', deliveries = deliveries + 1, \
                 lease_expires_at = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND state = 'queued'",
                params![lease_expires_at.to_rfc3339(), now.to_rfc3339(), job.id],
            )
            .map_err(DatabaseError::Query)?;

        if rows == 0 {
            // Lost the claim race against a concurrent worker
            return Ok(None);
        }

        job.state = JobState::Leased;
        job.deliveries += 1;
        job.lease_expires_at = Some(lease_expires_at);

        Ok(Some(job))
    }

    /// Acknowledge a job by deleting it
    pub fn complete_job(&self, job_id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Park a job dead immediately (e.g. no handler registered for its type)
    pub fn mark_job_dead(&self, job_id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE jobs SET state = 'dead', lease_expires_at = NULL, updated_at = ?1 \
                 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), job_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Requeue leased jobs whose lease ran out, bounded by the delivery
    /// budget.
    ///
    /// Jobs with remaining budget go back to `queued`; jobs over budget are
    /// parked `dead`. Returns the document ids of the newly dead jobs so the
    /// caller can record a final failure on them.
    pub fn release_expired_leases(&self, max_deliveries: u32) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE jobs SET state = 'queued', lease_expires_at = NULL, updated_at = ?1 \
             WHERE state = 'leased' AND lease_expires_at < ?1 AND deliveries < ?2",
            params![now, max_deliveries],
        )
        .map_err(DatabaseError::Query)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, document_id FROM jobs \
                 WHERE state = 'leased' AND lease_expires_at < ?1 AND deliveries >= ?2",
            )
            .map_err(DatabaseError::Query)?;

        let exhausted: Vec<(String, String)> = stmt
            .query_map(params![now, max_deliveries], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(DatabaseError::Query)?
            .collect::<Result<_, _>>()
            .map_err(DatabaseError::Query)?;

        let mut dead_document_ids = Vec::new();
        for (job_id, document_id) in exhausted {
            conn.execute(
                "UPDATE jobs SET state = 'dead', lease_expires_at = NULL, updated_at = ?1 \
                 WHERE id = ?2",
                params![now, job_id],
            )
            .map_err(DatabaseError::Query)?;
            dead_document_ids.push(document_id);
        }

        Ok(dead_document_ids)
    }

    /// Number of jobs currently waiting to be claimed
    pub fn queued_job_count(&self) -> ServiceResult<u64> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM jobs WHERE state = 'queued'", [], |row| {
                row.get(0)
            })
            .map_err(DatabaseError::Query)?;

        Ok(count as u64)
    }
}

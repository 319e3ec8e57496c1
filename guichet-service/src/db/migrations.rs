//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Document records: one row per submitted document.
        -- extracted_fields and errors are JSON TEXT columns so that a status
        -- transition and its payload always land in a single row write.
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            document_type TEXT NOT NULL,
            image_ref_primary TEXT NOT NULL,
            image_ref_secondary TEXT,
            owner_id TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            extracted_fields TEXT NOT NULL DEFAULT '{}',
            errors TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
        CREATE INDEX IF NOT EXISTS idx_documents_owner_created
            ON documents(owner_id, created_at);

        -- Job queue: the payload is only the document id. Jobs are claimed
        -- under a lease; expired leases are requeued until the delivery
        -- budget runs out, then parked dead for inspection.
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            document_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'queued',
            deliveries INTEGER NOT NULL DEFAULT 0,
            lease_expires_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
        CREATE INDEX IF NOT EXISTS idx_jobs_state_created ON jobs(state, created_at);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}

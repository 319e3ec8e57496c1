//! Document record operations.
//!
//! All status mutations in this module are compare-and-swap updates: the SQL
//! `WHERE` clause names the expected prior status, and the caller learns from
//! the affected-row count whether its transition won. Two workers racing on a
//! redelivered job therefore cannot double-apply a transition.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::Database;
use super::models::Document;
use crate::error::{DatabaseError, ServiceResult};

const DOCUMENT_COLUMNS: &str = "id, document_type, image_ref_primary, image_ref_secondary, \
     owner_id, original_filename, status, extracted_fields, errors, \
     created_at, updated_at, completed_at";

impl Database {
    /// Insert a new document record together with its extraction job.
    ///
    /// Both inserts share one transaction so a record and its job message are
    /// created atomically: a claimed job always finds its record, and no
    /// record is left behind without a job.
    pub fn create_document_with_job(&self, doc: &Document, job_type: &str) -> ServiceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let extracted_fields_json =
            serde_json::to_string(&doc.extracted_fields).map_err(DatabaseError::Serialization)?;
        let errors_json =
            serde_json::to_string(&doc.errors).map_err(DatabaseError::Serialization)?;

        tx.execute(
            r#"
            INSERT INTO documents (id, document_type, image_ref_primary, image_ref_secondary, owner_id, original_filename, status, extracted_fields, errors, created_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                doc.id,
                doc.document_type.as_str(),
                doc.image_ref_primary,
                doc.image_ref_secondary,
                doc.owner_id,
                doc.original_filename,
                doc.status.as_str(),
                extracted_fields_json,
                errors_json,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
                doc.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.execute(
            r#"
            INSERT INTO jobs (id, job_type, document_id, state, deliveries, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?4)
            "#,
            params![
                Uuid::new_v4().to_string(),
                job_type,
                doc.id,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id],
            |row| Document::from_row(row),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List an owner's documents, newest first
    pub fn list_documents_for_owner(&self, owner_id: &str) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC"
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![owner_id], |row| Document::from_row(row))
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }

    /// Transition `pending -> processing`.
    ///
    /// Returns false if the record was not in `pending`, meaning another
    /// delivery already moved it along.
    pub fn begin_processing(&self, document_id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'processing', updated_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Transition `processing -> completed`, storing the extracted fields and
    /// setting `completed_at` in the same statement.
    ///
    /// Returns false when the conditional update loses, i.e. a concurrent
    /// delivery settled the record first.
    pub fn complete_document(
        &self,
        document_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let fields_json = serde_json::to_string(fields).map_err(DatabaseError::Serialization)?;
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'completed', extracted_fields = ?1, \
                 completed_at = ?2, updated_at = ?2 \
                 WHERE id = ?3 AND status = 'processing'",
                params![fields_json, now, document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Transition `pending|processing -> failed`, appending an error message
    /// to the record's error list in the same atomic statement.
    ///
    /// Returns false when the record was already settled.
    pub fn fail_document(&self, document_id: &str, message: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'failed', \
                 errors = json_insert(errors, '$[#]', ?1), updated_at = ?2 \
                 WHERE id = ?3 AND status IN ('pending', 'processing')",
                params![message, Utc::now().to_rfc3339(), document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Transition `completed -> confirmed`, replacing the stored fields with
    /// the owner-reviewed mapping.
    ///
    /// `completed_at` was set by the completed transition and is deliberately
    /// left untouched. Returns false when the record was not in `completed`.
    pub fn confirm_document(
        &self,
        document_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let fields_json = serde_json::to_string(fields).map_err(DatabaseError::Serialization)?;

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'confirmed', extracted_fields = ?1, \
                 updated_at = ?2 \
                 WHERE id = ?3 AND status = 'completed'",
                params![fields_json, Utc::now().to_rfc3339(), document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::db::{Database, Document, DocumentStatus, DocumentType};

    fn open_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn pending_document(id: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            document_type: DocumentType::Cin,
            image_ref_primary: "/objects/u1/cin/front.jpg".to_string(),
            image_ref_secondary: None,
            owner_id: "u1".to_string(),
            original_filename: "front.jpg".to_string(),
            status: DocumentStatus::Pending,
            extracted_fields: BTreeMap::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn sample_fields() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("card_number".to_string(), "AB123".to_string()),
            ("sex".to_string(), "M".to_string()),
        ])
    }

    #[test]
    fn test_create_and_get_document() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1"), "extract_fields")
            .unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.extracted_fields.is_empty());
        assert!(doc.errors.is_empty());
        assert!(doc.completed_at.is_none());
        assert_eq!(db.queued_job_count().unwrap(), 1);

        assert!(db.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_begin_processing_is_conditional() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1"), "extract_fields")
            .unwrap();

        assert!(db.begin_processing("d1").unwrap());
        // Second delivery loses the CAS
        assert!(!db.begin_processing("d1").unwrap());

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
    }

    #[test]
    fn test_complete_requires_processing() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1"), "extract_fields")
            .unwrap();

        // Cannot complete straight from pending
        assert!(!db.complete_document("d1", &sample_fields()).unwrap());
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.extracted_fields.is_empty());

        assert!(db.begin_processing("d1").unwrap());
        assert!(db.complete_document("d1", &sample_fields()).unwrap());

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.extracted_fields, sample_fields());
        assert!(doc.completed_at.is_some());

        // A racing duplicate completion is a no-op
        assert!(!db.complete_document("d1", &sample_fields()).unwrap());
    }

    #[test]
    fn test_fail_from_pending_and_processing() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1"), "extract_fields")
            .unwrap();
        db.create_document_with_job(&pending_document("d2"), "extract_fields")
            .unwrap();

        // pending -> failed
        assert!(db.fail_document("d1", "Missing primary image reference").unwrap());
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.errors, vec!["Missing primary image reference".to_string()]);
        assert!(doc.completed_at.is_none());

        // processing -> failed
        assert!(db.begin_processing("d2").unwrap());
        assert!(db.fail_document("d2", "Extraction failed: backend down").unwrap());
        let doc = db.get_document("d2").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);

        // failed is terminal for the worker
        assert!(!db.fail_document("d1", "again").unwrap());
        assert!(!db.begin_processing("d1").unwrap());
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.errors.len(), 1);
    }

    #[test]
    fn test_error_messages_append_in_order() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1"), "extract_fields")
            .unwrap();

        // fail_document appends; a record can accumulate messages only while
        // unsettled, so push through the statuses manually here
        assert!(db.begin_processing("d1").unwrap());
        assert!(db.fail_document("d1", "first").unwrap());

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.errors, vec!["first".to_string()]);
    }

    #[test]
    fn test_confirm_only_from_completed() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1"), "extract_fields")
            .unwrap();

        // pending record cannot be confirmed
        assert!(!db.confirm_document("d1", &sample_fields()).unwrap());
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);

        db.begin_processing("d1").unwrap();
        assert!(!db.confirm_document("d1", &sample_fields()).unwrap());

        db.complete_document("d1", &sample_fields()).unwrap();
        let completed_at = db
            .get_document("d1")
            .unwrap()
            .unwrap()
            .completed_at
            .unwrap();

        let edited = BTreeMap::from([("card_number".to_string(), "AB124".to_string())]);
        assert!(db.confirm_document("d1", &edited).unwrap());

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Confirmed);
        assert_eq!(doc.extracted_fields, edited);
        // completed_at never changes once set
        assert_eq!(doc.completed_at.unwrap(), completed_at);

        // confirmed is terminal
        assert!(!db.confirm_document("d1", &edited).unwrap());
        assert!(!db.begin_processing("d1").unwrap());
        assert!(!db.fail_document("d1", "late failure").unwrap());
    }

    #[test]
    fn test_list_documents_for_owner_newest_first() {
        let (db, _dir) = open_test_db();

        let now = Utc::now();
        let mut older = pending_document("d1");
        older.created_at = now - chrono::Duration::minutes(5);
        let mut newer = pending_document("d2");
        newer.created_at = now;
        let mut other_owner = pending_document("d3");
        other_owner.owner_id = "u2".to_string();

        db.create_document_with_job(&older, "extract_fields").unwrap();
        db.create_document_with_job(&newer, "extract_fields").unwrap();
        db.create_document_with_job(&other_owner, "extract_fields")
            .unwrap();

        let docs = db.list_documents_for_owner("u1").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "d2");
        assert_eq!(docs[1].id, "d1");
    }
}

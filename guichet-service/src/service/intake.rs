//! Document submission flow.
//!
//! Validation happens before any side effect, and the image uploads happen
//! before any record exists: an upload failure therefore never leaves an
//! orphan record, and a record is always created together with exactly one
//! extraction job (single transaction).

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Document, DocumentStatus, DocumentType};
use crate::error::{ServiceError, ServiceResult};
use crate::service::{GuichetService, JOB_TYPE_EXTRACT_FIELDS};

/// Image file extensions accepted for upload (case-insensitive)
const ALLOWED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "jpe", "jfif", "webp", "gif", "bmp", "tiff", "tif", "svg", "ico",
    "heic", "heif", "avif", "jp2", "j2k", "jpx",
];

/// One uploaded image payload as received from the API layer
pub struct UploadedImage {
    pub filename: String,
    pub bytes: Bytes,
}

fn is_allowed_image(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl GuichetService {
    /// Submit a document for asynchronous extraction.
    ///
    /// Returns the freshly created `pending` record; extraction happens in
    /// the background and the caller polls the record for completion.
    pub async fn submit_document(
        &self,
        owner_id: &str,
        document_type: &str,
        primary: UploadedImage,
        secondary: Option<UploadedImage>,
    ) -> ServiceResult<Document> {
        let document_type =
            DocumentType::parse(document_type).ok_or_else(|| ServiceError::InvalidRequest {
                message: format!(
                    "Invalid document_type '{document_type}'. Must be one of: {}",
                    DocumentType::ALL
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;

        if primary.filename.is_empty() || primary.bytes.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Primary (front) image is required".to_string(),
            });
        }
        if !is_allowed_image(&primary.filename) {
            return Err(ServiceError::UnsupportedFormat {
                format: primary.filename.clone(),
            });
        }
        if let Some(secondary) = &secondary {
            if !is_allowed_image(&secondary.filename) {
                return Err(ServiceError::UnsupportedFormat {
                    format: secondary.filename.clone(),
                });
            }
        }

        // Upload before any record exists; a storage failure surfaces to the
        // caller with no partial state left behind.
        let folder = format!("{owner_id}/{}", document_type.as_str());
        let image_ref_primary = self
            .store
            .put(&folder, &primary.filename, primary.bytes.clone())
            .await?;

        let mut image_ref_secondary = None;
        let original_filename = match &secondary {
            Some(secondary) => {
                let reference = match self
                    .store
                    .put(&folder, &secondary.filename, secondary.bytes.clone())
                    .await
                {
                    Ok(reference) => reference,
                    Err(e) => {
                        // No record references the primary blob yet; drop it
                        // so a failed submission leaves nothing behind.
                        if let Err(cleanup_err) = self.store.delete(&image_ref_primary).await {
                            warn!(
                                reference = %image_ref_primary,
                                error = %cleanup_err,
                                "Failed to clean up primary image after secondary upload failure"
                            );
                        }
                        return Err(e.into());
                    }
                };
                image_ref_secondary = Some(reference);
                format!("{}, {}", primary.filename, secondary.filename)
            }
            None => primary.filename.clone(),
        };

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            document_type,
            image_ref_primary,
            image_ref_secondary,
            owner_id: owner_id.to_string(),
            original_filename,
            status: DocumentStatus::Pending,
            extracted_fields: BTreeMap::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.db
            .create_document_with_job(&document, JOB_TYPE_EXTRACT_FIELDS)?;

        info!(
            doc_id = %document.id,
            document_type = %document_type.as_str(),
            owner_id = %owner_id,
            "Document submitted and queued for extraction"
        );

        Ok(document)
    }
}

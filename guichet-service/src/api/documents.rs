//! Document API endpoints.
//!
//! Handlers for submission (multipart upload), retrieval, listing,
//! confirmation, and the per-type field catalogs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Document, DocumentStatus, DocumentType};
use crate::error::{ServiceError, ServiceResult};
use crate::fields::field_catalog;
use crate::service::UploadedImage;

use super::AppState;

/// Owner-facing view of a document record.
///
/// Extracted fields are exposed only once the record is completed or
/// confirmed; before that the mapping is meaningless and stays hidden.
#[derive(Serialize)]
pub struct DocumentView {
    pub id: String,
    pub document_type: DocumentType,
    pub original_filename: String,
    pub image_ref_primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref_secondary: Option<String>,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_fields: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Document> for DocumentView {
    fn from(doc: Document) -> Self {
        let extracted_fields = match doc.status {
            DocumentStatus::Completed | DocumentStatus::Confirmed => Some(doc.extracted_fields),
            _ => None,
        };
        let errors = if doc.errors.is_empty() {
            None
        } else {
            Some(doc.errors)
        };

        Self {
            id: doc.id,
            document_type: doc.document_type,
            original_filename: doc.original_filename,
            image_ref_primary: doc.image_ref_primary,
            image_ref_secondary: doc.image_ref_secondary,
            status: doc.status,
            extracted_fields,
            errors,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            completed_at: doc.completed_at,
        }
    }
}

/// List documents query parameters
#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub owner_id: Option<String>,
}

/// Request to confirm a completed document
#[derive(Deserialize)]
pub struct ConfirmDocumentRequest {
    pub fields: BTreeMap<String, String>,
}

/// Field catalog response
#[derive(Serialize)]
pub struct FieldCatalogResponse {
    pub document_type: DocumentType,
    pub fields: Vec<&'static str>,
}

/// Submit a new document for extraction
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<DocumentView>)> {
    let mut owner_id: Option<String> = None;
    let mut document_type: Option<String> = None;
    let mut primary: Option<(String, Bytes)> = None;
    let mut secondary: Option<(String, Bytes)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "owner_id" => {
                owner_id = Some(field.text().await.map_err(|e| {
                    ServiceError::InvalidRequest {
                        message: e.to_string(),
                    }
                })?);
            }
            "document_type" => {
                document_type = Some(field.text().await.map_err(|e| {
                    ServiceError::InvalidRequest {
                        message: e.to_string(),
                    }
                })?);
            }
            "primary" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::InvalidRequest {
                        message: e.to_string(),
                    })?;
                primary = Some((filename, data));
            }
            "secondary" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::InvalidRequest {
                        message: e.to_string(),
                    })?;
                // An empty secondary part is treated as absent
                if !filename.is_empty() && !data.is_empty() {
                    secondary = Some((filename, data));
                }
            }
            _ => {}
        }
    }

    let owner_id = owner_id.filter(|o| !o.is_empty()).ok_or_else(|| {
        ServiceError::InvalidRequest {
            message: "owner_id is required".to_string(),
        }
    })?;
    let document_type = document_type.ok_or_else(|| ServiceError::InvalidRequest {
        message: "document_type is required".to_string(),
    })?;
    let (filename, bytes) = primary.ok_or_else(|| ServiceError::InvalidRequest {
        message: "Primary (front) image is required".to_string(),
    })?;

    let document = state
        .service
        .submit_document(
            &owner_id,
            &document_type,
            UploadedImage { filename, bytes },
            secondary.map(|(filename, bytes)| UploadedImage { filename, bytes }),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(document.into())))
}

/// Get a specific document by ID
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DocumentView>> {
    let document = state.service.get_document(&id)?;
    Ok(Json(document.into()))
}

/// List the owner's documents, newest first
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> ServiceResult<Json<Vec<DocumentView>>> {
    let owner_id = params
        .owner_id
        .filter(|o| !o.is_empty())
        .ok_or_else(|| ServiceError::InvalidRequest {
            message: "owner_id query parameter is required".to_string(),
        })?;

    let documents = state.service.list_documents(&owner_id)?;
    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

/// Confirm a completed document with owner-reviewed fields
pub async fn confirm_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ConfirmDocumentRequest>,
) -> ServiceResult<Json<DocumentView>> {
    let document = state.service.confirm_document(&id, &request.fields)?;
    Ok(Json(document.into()))
}

/// The extractable field catalog for a document type
pub async fn document_fields_handler(
    Path(document_type): Path<String>,
) -> ServiceResult<Json<FieldCatalogResponse>> {
    let document_type =
        DocumentType::parse(&document_type).ok_or_else(|| ServiceError::InvalidRequest {
            message: format!("Invalid document_type '{document_type}'"),
        })?;

    Ok(Json(FieldCatalogResponse {
        document_type,
        fields: field_catalog(document_type).to_vec(),
    }))
}

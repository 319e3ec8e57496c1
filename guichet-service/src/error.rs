use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("{0}")]
    Vision(#[from] VisionError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Storage error")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Status conflict: {message}")]
    StatusConflict { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Vision extraction backend errors
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Connection failed to vision backend at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Extraction failed (status {status}): {message}")]
    Extraction { status: u16, message: String },

    #[error("Invalid response from vision backend: {message}")]
    InvalidResponse { message: String },

    #[error("Extraction returned no usable fields")]
    EmptyResult,
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Object store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {reference}")]
    NotFound { reference: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// API error response envelope
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::StatusConflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::Vision(VisionError::Connection { .. }) => "vision_connection",
            ServiceError::Vision(VisionError::Extraction { .. }) => "vision_extraction",
            ServiceError::Vision(VisionError::InvalidResponse { .. }) => "vision_invalid_response",
            ServiceError::Vision(VisionError::EmptyResult) => "vision_empty_result",
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(StorageError::NotFound { .. }) => "object_not_found",
            ServiceError::Storage(StorageError::Io(_)) => "storage_io_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::UnsupportedFormat { .. } => "unsupported_format",
            ServiceError::StatusConflict { .. } => "status_conflict",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
            details: None,
            retry_after_secs: None,
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

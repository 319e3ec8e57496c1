//! Database model structs.
//!
//! This module contains the data structures for database records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Processing status for submitted documents.
///
/// The only legal transitions are `pending -> processing`,
/// `pending -> failed`, `processing -> completed`, `processing -> failed`
/// and `completed -> confirmed`. Every transition is enforced in SQL as a
/// conditional update against the expected prior status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Submitted, waiting for a worker to pick up the job
    Pending,
    /// A worker is running extraction
    Processing,
    /// Extraction succeeded; fields are populated
    Completed,
    /// Extraction or a precondition failed; see the errors list
    Failed,
    /// Owner reviewed and confirmed the extracted fields
    Confirmed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Confirmed => "confirmed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            "confirmed" => DocumentStatus::Confirmed,
            _ => DocumentStatus::Pending,
        }
    }

    /// True once no further worker-driven transition can occur
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Confirmed
        )
    }
}

/// The closed set of supported document types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// National identity card (recto, optionally verso)
    Cin,
    DrivingLicense,
    VehicleRegistration,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Cin => "cin",
            DocumentType::DrivingLicense => "driving_license",
            DocumentType::VehicleRegistration => "vehicle_registration",
        }
    }

    /// Parse a user-supplied type tag; unknown tags are a validation error
    /// at the submission boundary, so this is fallible
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cin" => Some(DocumentType::Cin),
            "driving_license" => Some(DocumentType::DrivingLicense),
            "vehicle_registration" => Some(DocumentType::VehicleRegistration),
            _ => None,
        }
    }

    pub const ALL: &[DocumentType] = &[
        DocumentType::Cin,
        DocumentType::DrivingLicense,
        DocumentType::VehicleRegistration,
    ];
}

/// Document record: one submitted document and its processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub document_type: DocumentType,
    pub image_ref_primary: String,
    pub image_ref_secondary: Option<String>,
    pub owner_id: String,
    pub original_filename: String,
    pub status: DocumentStatus,
    /// Extracted field name -> value; empty until status reaches completed
    pub extracted_fields: BTreeMap<String, String>,
    /// Append-only failure messages, oldest first
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let document_type_str: String = row.get(1)?;
        let status_str: String = row.get(6)?;
        let extracted_fields_str: String = row.get(7)?;
        let errors_str: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;
        let completed_at_str: Option<String> = row.get(11)?;

        Ok(Self {
            id: row.get(0)?,
            document_type: DocumentType::parse(&document_type_str)
                .unwrap_or(DocumentType::Cin),
            image_ref_primary: row.get(2)?,
            image_ref_secondary: row.get(3)?,
            owner_id: row.get(4)?,
            original_filename: row.get(5)?,
            status: DocumentStatus::from_str(&status_str),
            extracted_fields: serde_json::from_str(&extracted_fields_str).unwrap_or_default(),
            errors: serde_json::from_str(&errors_str).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            completed_at: completed_at_str.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
        })
    }
}

/// Queue state of a job row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed
    Queued,
    /// Claimed by a worker; redelivered if the lease expires
    Leased,
    /// Delivery budget exhausted; kept for inspection
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Leased => "leased",
            JobState::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "leased" => JobState::Leased,
            "dead" => JobState::Dead,
            _ => JobState::Queued,
        }
    }
}

/// One queued job. The payload is just the document id; the worker re-reads
/// authoritative state from the documents table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub job_type: String,
    pub document_id: String,
    pub state: JobState,
    /// Times this job has been handed to a worker, including the current lease
    pub deliveries: u32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedJob {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let state_str: String = row.get(3)?;
        let deliveries: i64 = row.get(4)?;
        let lease_expires_at_str: Option<String> = row.get(5)?;
        let created_at_str: String = row.get(6)?;
        let updated_at_str: String = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            job_type: row.get(1)?,
            document_id: row.get(2)?,
            state: JobState::from_str(&state_str),
            deliveries: deliveries as u32,
            lease_expires_at: lease_expires_at_str.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_parse() {
        assert_eq!(DocumentType::parse("cin"), Some(DocumentType::Cin));
        assert_eq!(
            DocumentType::parse("driving_license"),
            Some(DocumentType::DrivingLicense)
        );
        assert_eq!(
            DocumentType::parse("vehicle_registration"),
            Some(DocumentType::VehicleRegistration)
        );
        assert_eq!(DocumentType::parse("passport"), None);
        assert_eq!(DocumentType::parse(""), None);
        assert_eq!(DocumentType::parse("CIN"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
            DocumentStatus::Confirmed,
        ] {
            assert_eq!(DocumentStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_status_settled() {
        assert!(!DocumentStatus::Pending.is_settled());
        assert!(!DocumentStatus::Processing.is_settled());
        assert!(DocumentStatus::Completed.is_settled());
        assert!(DocumentStatus::Failed.is_settled());
        assert!(DocumentStatus::Confirmed.is_settled());
    }
}

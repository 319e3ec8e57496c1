//! Per-type field catalogs and extraction-output handling.
//!
//! Each document type has a closed catalog of field names. The catalog
//! drives the extraction prompt, restricts which keys of the model output
//! are accepted, and marks the date-valued fields for normalization.

use std::collections::BTreeMap;

use crate::db::DocumentType;
use crate::error::VisionError;

/// Fields extractable from a CIN (front and back combined)
const CIN_FIELDS: &[&str] = &[
    "card_number",
    "last_name_fr",
    "last_name_ar",
    "first_name_fr",
    "first_name_ar",
    "birth_date",
    "birth_place_fr",
    "birth_place_ar",
    "expiry_date",
    "sex",
    "father_name_fr",
    "father_name_ar",
    "mother_name_fr",
    "mother_name_ar",
    "address_fr",
    "address_ar",
    "can_number",
];

const DRIVING_LICENSE_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "birth_date",
    "birth_place_fr",
    "birth_place_ar",
    "cin_number",
    "address_fr",
    "address_ar",
    "license_number",
    "issue_date",
    "issue_place",
    "categories",
    "expiry_date",
];

const VEHICLE_REGISTRATION_FIELDS: &[&str] = &[
    "registration_number",
    "owner_name_fr",
    "owner_name_ar",
    "owner_address_fr",
    "owner_address_ar",
    "usage",
    "first_registration_date",
    "first_registration_morocco_date",
    "expiry_date",
    "vin",
    "make",
    "model",
];

const CIN_DATE_FIELDS: &[&str] = &["birth_date", "expiry_date"];
const DRIVING_LICENSE_DATE_FIELDS: &[&str] = &["birth_date", "issue_date", "expiry_date"];
const VEHICLE_REGISTRATION_DATE_FIELDS: &[&str] = &[
    "first_registration_date",
    "first_registration_morocco_date",
    "expiry_date",
];

/// The closed field catalog for a document type
pub fn field_catalog(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::Cin => CIN_FIELDS,
        DocumentType::DrivingLicense => DRIVING_LICENSE_FIELDS,
        DocumentType::VehicleRegistration => VEHICLE_REGISTRATION_FIELDS,
    }
}

fn date_fields(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::Cin => CIN_DATE_FIELDS,
        DocumentType::DrivingLicense => DRIVING_LICENSE_DATE_FIELDS,
        DocumentType::VehicleRegistration => VEHICLE_REGISTRATION_DATE_FIELDS,
    }
}

/// Build the instruction text for one extraction call
pub fn extraction_prompt(document_type: DocumentType, two_sided: bool) -> String {
    let type_tag = document_type.as_str();
    let catalog = field_catalog(document_type).join(", ");

    let mut prompt = format!(
        "You are an expert OCR assistant for Moroccan identity and vehicle documents. \
         The attached image shows a {type_tag}. \
         Extract the visible fields and answer with a single JSON object whose keys \
         come only from this list: {catalog}. \
         Omit fields that are not visible instead of guessing. \
         Copy text character-by-character exactly as printed; never invent, drop, \
         or correct characters, in French or in Arabic."
    );

    if two_sided {
        prompt.push_str(
            " Two images are attached: the first is the front of the card and the \
             second is the back. Fill the schema from both sides.",
        );
    }

    prompt
}

/// In-place `-`/`.` -> `/` cleanup on the date-valued fields of a result
pub fn normalize_dates(document_type: DocumentType, fields: &mut BTreeMap<String, String>) {
    for name in date_fields(document_type) {
        if let Some(value) = fields.get_mut(*name) {
            *value = value.trim().replace(['-', '.'], "/");
        }
    }
}

/// Parse raw model output into a field mapping.
///
/// Extraction is all-or-nothing: the output must be a JSON object, only keys
/// from the type's catalog are kept, and an empty surviving mapping is a
/// failure rather than a completed-with-nothing result. Array values (e.g.
/// license categories) are flattened to a comma-separated string.
pub fn parse_extraction(
    raw: &str,
    document_type: DocumentType,
) -> Result<BTreeMap<String, String>, VisionError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| VisionError::InvalidResponse {
            message: format!("not valid JSON: {e}"),
        })?;

    let object = value.as_object().ok_or_else(|| VisionError::InvalidResponse {
        message: "expected a JSON object of field values".to_string(),
    })?;

    let catalog = field_catalog(document_type);
    let mut fields = BTreeMap::new();

    for (key, value) in object {
        if !catalog.contains(&key.as_str()) {
            continue;
        }
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => {
                fields.insert(key.clone(), s.trim().to_string());
            }
            serde_json::Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                if !joined.is_empty() {
                    fields.insert(key.clone(), joined);
                }
            }
            _ => {}
        }
    }

    if fields.is_empty() {
        return Err(VisionError::EmptyResult);
    }

    normalize_dates(document_type, &mut fields);

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extraction_keeps_catalog_fields() {
        let raw = r#"{
            "card_number": "AB123",
            "sex": "M",
            "birth_date": "01-02-1990",
            "favorite_color": "blue",
            "address_fr": null
        }"#;

        let fields = parse_extraction(raw, DocumentType::Cin).unwrap();
        assert_eq!(fields.get("card_number").unwrap(), "AB123");
        assert_eq!(fields.get("sex").unwrap(), "M");
        // Dates are normalized to slash separators
        assert_eq!(fields.get("birth_date").unwrap(), "01/02/1990");
        // Unknown keys and nulls are dropped
        assert!(!fields.contains_key("favorite_color"));
        assert!(!fields.contains_key("address_fr"));
    }

    #[test]
    fn test_parse_extraction_flattens_arrays() {
        let raw = r#"{"license_number": "77/123", "categories": ["A", "B"]}"#;

        let fields = parse_extraction(raw, DocumentType::DrivingLicense).unwrap();
        assert_eq!(fields.get("categories").unwrap(), "A, B");
    }

    #[test]
    fn test_parse_extraction_rejects_non_object() {
        assert!(matches!(
            parse_extraction("\"just a string\"", DocumentType::Cin),
            Err(VisionError::InvalidResponse { .. })
        ));
        assert!(matches!(
            parse_extraction("not json at all", DocumentType::Cin),
            Err(VisionError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_parse_extraction_rejects_empty_result() {
        // Valid JSON, but nothing survives the catalog filter
        assert!(matches!(
            parse_extraction(r#"{"favorite_color": "blue"}"#, DocumentType::Cin),
            Err(VisionError::EmptyResult)
        ));
        assert!(matches!(
            parse_extraction("{}", DocumentType::Cin),
            Err(VisionError::EmptyResult)
        ));
    }

    #[test]
    fn test_normalize_dates_only_touches_date_fields() {
        let mut fields = BTreeMap::from([
            ("expiry_date".to_string(), "2030.01.15".to_string()),
            ("make".to_string(), "Mercedes-Benz".to_string()),
        ]);
        normalize_dates(DocumentType::VehicleRegistration, &mut fields);
        assert_eq!(fields.get("expiry_date").unwrap(), "2030/01/15");
        assert_eq!(fields.get("make").unwrap(), "Mercedes-Benz");
    }

    #[test]
    fn test_extraction_prompt_mentions_both_sides_when_two_sided() {
        let single = extraction_prompt(DocumentType::Cin, false);
        let double = extraction_prompt(DocumentType::Cin, true);
        assert!(single.contains("cin"));
        assert!(!single.contains("back"));
        assert!(double.contains("front"));
        assert!(double.contains("back"));
    }
}

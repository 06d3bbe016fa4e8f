use crate::models::record::{ExtractedRecord, ReceiptRecord, RecordStatus};

/// Fallback message when a backend reports failure without saying why.
const GENERIC_EXTRACTION_FAILURE: &str = "Extraction failed without a reported reason";

/// Why an extracted record must not be persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Structural failure: required envelope fields are absent.
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// Semantic failure reported by the extraction backend itself.
    #[error("{0}")]
    Reported(String),
}

/// Check an extracted record before it may be persisted.
///
/// Structural checks run first: `id`, `status` and `createdAt` must all be
/// present and `id` non-blank. A complete record whose status is `error` is
/// rejected with the backend's message.
pub fn validate_record(record: ExtractedRecord) -> Result<ReceiptRecord, Rejection> {
    let mut missing = Vec::new();
    let id = record.id.filter(|id| !id.trim().is_empty());
    if id.is_none() {
        missing.push("id");
    }
    if record.status.is_none() {
        missing.push("status");
    }
    if record.created_at.is_none() {
        missing.push("createdAt");
    }

    let (Some(id), Some(status), Some(created_at)) = (id, record.status, record.created_at) else {
        return Err(Rejection::MissingFields(missing));
    };

    if status == RecordStatus::Error {
        let message = record
            .error
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| GENERIC_EXTRACTION_FAILURE.to_string());
        return Err(Rejection::Reported(message));
    }

    Ok(ReceiptRecord {
        id,
        status,
        created_at,
        source_image_ref: record.source_image_ref,
        fields: record.fields,
    })
}

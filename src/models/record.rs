use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Provider-defined receipt fields (merchant, total, date, line items, ...).
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Review status of an extracted receipt record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    Draft,
    Approved,
    Rejected,
    Error,
}

/// Record as returned by an extraction backend.
///
/// The envelope is optional on purpose: backends may hand back structurally
/// incomplete records, which the validation gate turns into item errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecord {
    pub id: Option<String>,
    pub status: Option<RecordStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub source_image_ref: Option<String>,
    /// Backend-reported failure message, set alongside `status = error`.
    pub error: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

impl ExtractedRecord {
    /// A fresh draft record with a newly generated id.
    pub fn draft(fields: Fields, source_image_ref: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            status: Some(RecordStatus::Draft),
            created_at: Some(Utc::now()),
            source_image_ref: Some(source_image_ref.into()),
            error: None,
            fields,
        }
    }

    /// A record describing a semantic extraction failure.
    pub fn failed(message: impl Into<String>, source_image_ref: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            status: Some(RecordStatus::Error),
            created_at: Some(Utc::now()),
            source_image_ref: Some(source_image_ref.into()),
            error: Some(message.into()),
            fields: Fields::new(),
        }
    }
}

/// A validated record ready for, or read back from, the document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub id: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub source_image_ref: Option<String>,
    pub fields: Fields,
}

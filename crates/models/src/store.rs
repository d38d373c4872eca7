use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Processed,
    Quarantined,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    #[default]
    Ok,
    ParseError,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ParseError,
    SchemaNotFound,
    VariantAmbiguous,
    MappingError,
    ImmutableConflict,
    SinkError,
    Timeout,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Warning,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContent {
    pub file_path: String,
    #[serde(default = "default_source_system")]
    pub source_system: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub content_hash: String,
}

fn default_source_system() -> String {
    "fs".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalContent {
    #[serde(default = "default_canonical_format")]
    pub format: String,
    pub hash: String,
}

fn default_canonical_format() -> String {
    "canonical_json_v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentClassification {
    pub registry_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRef {
    pub register_schema: String,
    pub variant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub category: FailureCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WriteSummary {
    pub nodes_upserted: u64,
    pub relationships_created: u64,
    pub conflicts: u64,
}

/// Per-document record in the document store, updated at each stage.
/// Terminal states are `processed`, `quarantined`, and `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedDocument {
    pub document_id: String,
    pub run_id: String,
    pub raw: RawContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<CanonicalContent>,
    #[serde(with = "time::serde::rfc3339")]
    pub discovered_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<DocumentClassification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_ref: Option<SchemaRef>,
    #[serde(default)]
    pub parse_status: ParseStatus,
    pub ingestion_status: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    #[serde(default)]
    pub write_summary: WriteSummary,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,
}

impl IngestedDocument {
    pub fn new(document_id: String, run_id: String, raw: RawContent) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            document_id,
            run_id,
            raw,
            canonical: None,
            discovered_at: now,
            classification: None,
            schema_ref: None,
            parse_status: ParseStatus::Ok,
            ingestion_status: IngestionStatus::Pending,
            failure: None,
            write_summary: WriteSummary::default(),
            last_updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated_at = OffsetDateTime::now_utc();
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub documents_processed: u64,
    pub documents_quarantined: u64,
    pub documents_failed: u64,
    pub documents_skipped: u64,
    pub entities_extracted: u64,
    pub entities_upserted: u64,
    pub relationships_created: u64,
    pub immutable_conflicts: u64,
}

/// Per-execution aggregate, upserted by `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    pub run_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub status: RunStatus,
    #[serde(default)]
    pub metrics: RunMetrics,
}

impl IngestionRun {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: OffsetDateTime::now_utc(),
            finished_at: None,
            status: RunStatus::Running,
            metrics: RunMetrics::default(),
        }
    }
}

/// Append-only structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionLog {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub step: String,
    pub status: LogStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineState {
    #[default]
    Open,
    Resolved,
    Ignored,
}

/// Terminal, document-local failure record. A new quarantine replaces any
/// open quarantine for the same file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedDocument {
    pub document_id: String,
    pub file_path: String,
    pub content_hash: String,
    pub reason: FailureCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub status: QuarantineState,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_document_record_round_trip() {
        let doc = IngestedDocument::new(
            "doc-1".to_string(),
            "run-1".to_string(),
            RawContent {
                file_path: "in/a.json".to_string(),
                source_system: "fs".to_string(),
                content_type: "application/json".to_string(),
                encoding: None,
                content_hash: "abc".to_string(),
            },
        );

        let json = serde_json::to_string(&doc).unwrap();
        let back: IngestedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ingestion_status, IngestionStatus::Pending);
        assert_eq!(back.parse_status, ParseStatus::Ok);
        assert!(back.failure.is_none());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(FailureCategory::VariantAmbiguous).unwrap(),
            serde_json::json!("variant_ambiguous"),
        );
        assert_eq!(
            serde_json::to_value(IngestionStatus::Quarantined).unwrap(),
            serde_json::json!("quarantined"),
        );
    }
}

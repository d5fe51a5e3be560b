use serde::{Deserialize, Serialize};

/// A stored transcription row. Write-once; re-uploads with the same
/// `source_name` reuse the existing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub id: i64,
    pub text: String,
    pub source_name: String,
    pub sequence_no: i64,
    pub created_at: String,
}

/// The triple that produced an audit, for the user_road traceability row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Road {
    pub scenario_id: i64,
    pub report_type_id: i64,
    pub building_id: i64,
}

/// Result of persisting one finished analysis.
#[derive(Debug, Clone, Copy)]
pub struct PersistedAnalysis {
    pub audit_id: i64,
    pub transcription_id: i64,
}

/// Prior audits for one (scenario, report_type) pair, for RAG ingestion.
#[derive(Debug, Clone)]
pub struct ReportGroup {
    pub scenario: String,
    pub report_type: String,
    pub texts: Vec<String>,
}

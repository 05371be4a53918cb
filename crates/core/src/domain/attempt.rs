use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::ExtractedPayload;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub String);

impl AttemptId {
    pub fn generate() -> Self {
        Self(format!("VA-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    NeedsMoreInfo,
    Error,
}

impl ValidationStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "valid" => Some(Self::Valid),
            "invalid" => Some(Self::Invalid),
            "needs_more_info" => Some(Self::NeedsMoreInfo),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::NeedsMoreInfo => "needs_more_info",
            Self::Error => "error",
        }
    }
}

/// One recorded estimation request, persisted for every outcome.
///
/// Immutable after creation except `derived_metrics`, which the compute
/// stage sets exactly once. Attempts are never deleted by the pipeline;
/// retries reference their predecessor through `parent_attempt_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub id: AttemptId,
    pub user_id: String,
    pub project_id: Option<String>,
    pub parent_attempt_id: Option<AttemptId>,
    pub status: ValidationStatus,
    pub raw_input_text: String,
    pub extracted_payload: Option<ExtractedPayload>,
    pub missing_fields: Vec<String>,
    pub invalid_fields: Vec<String>,
    pub unit_warnings: Vec<String>,
    pub derived_metrics: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

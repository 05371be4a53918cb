//! Pipeline state: the request, per-stage outcomes, and the composite
//! result handed back to the caller.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::SelectionPath;
use crate::domain::attempt::{AttemptId, ValidationAttempt};
use crate::domain::boq::{Boq, BoqItem};
use crate::geometry::GeometryReport;
use crate::materializer::MaterializedRuleSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validate,
    SelectRules,
    ComputeBoq,
    AssembleProvenance,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::SelectRules => "select_rules",
            Self::ComputeBoq => "compute_boq",
            Self::AssembleProvenance => "assemble_provenance",
        }
    }
}

/// One estimation request as accepted from the interface layer.
#[derive(Clone, Debug, PartialEq)]
pub struct EstimateRequest {
    pub user_id: String,
    pub project_id: Option<String>,
    pub raw_input_text: String,
    /// Retry lineage: the attempt this request corrects, if any.
    pub parent_attempt_id: Option<AttemptId>,
}

/// Outcome slot for a stage that runs after validation. A failure is
/// contained here instead of aborting the run; the following stage guards
/// on `Completed`.
#[derive(Clone, Debug, PartialEq)]
pub enum StageResult<T> {
    Completed(T),
    Failed { reason: String },
    NotRun,
}

impl<T> StageResult<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationOutcome {
    pub attempt: ValidationAttempt,
    pub report: GeometryReport,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RulesOutcome {
    pub path: SelectionPath,
    pub rule_sets: Vec<MaterializedRuleSet>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputeOutcome {
    pub boq: Boq,
    pub items: Vec<BoqItem>,
    pub metrics: BTreeMap<String, Decimal>,
}

/// Composite result of one pipeline run. The attempt always exists; later
/// slots depend on how far the run progressed.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineResult {
    pub validation: ValidationOutcome,
    pub rules: StageResult<RulesOutcome>,
    pub compute: StageResult<ComputeOutcome>,
    /// The merged provenance blob, as persisted on the BOQ row.
    pub provenance: StageResult<serde_json::Value>,
}

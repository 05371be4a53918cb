use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::attempt::AttemptId;
use crate::domain::rules::{CategoryId, RuleItemId};
use crate::units::RateBasis;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoqId(pub String);

impl BoqId {
    pub fn generate() -> Self {
        Self(format!("BOQ-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for BoqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoqStatus {
    Draft,
    Approved,
    Sent,
}

impl BoqStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "approved" => Some(Self::Approved),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Sent => "sent",
        }
    }
}

/// One computed bill of quantities, created per (user, project, attempt)
/// compute run. `compute_json` is the merged provenance blob: the
/// rule-selection decision plus the raw items of every rule set used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Boq {
    pub id: BoqId,
    pub user_id: String,
    pub project_id: Option<String>,
    pub validation_attempt_id: AttemptId,
    pub status: BoqStatus,
    pub compute_json: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// The recorded inputs behind one BOQ line, sufficient to reproduce the
/// multiplication that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationTrace {
    /// Every derived metric known at compute time, stringified exactly.
    pub metrics: BTreeMap<String, String>,
    pub metric: String,
    pub metric_value: String,
    pub rate_key: String,
    pub rate: String,
    pub unit: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoqItemId(pub String);

impl BoqItemId {
    pub fn generate() -> Self {
        Self(format!("BI-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoqItem {
    pub id: BoqItemId,
    pub boq_id: BoqId,
    pub category_id: Option<CategoryId>,
    pub rule_item_id: Option<RuleItemId>,
    pub material_name: String,
    pub quantity: Decimal,
    pub unit: String,
    pub quantity_basis: RateBasis,
    pub notes: Option<String>,
    pub calculation_trace: Option<CalculationTrace>,
}

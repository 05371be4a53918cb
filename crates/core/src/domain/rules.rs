use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::units::RateBasis;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub String);

impl CategoryId {
    pub fn generate() -> Self {
        Self(format!("CAT-{}", Uuid::new_v4().simple()))
    }
}

/// Stable dictionary entry for a construction domain category
/// (earthwork, cement_concrete_work, flooring, ...). Looked up
/// case-insensitively and auto-created when an unrecognized name is
/// selected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoqCategory {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasterRuleSetId(pub String);

impl MasterRuleSetId {
    pub fn generate() -> Self {
        Self(format!("MRS-{}", Uuid::new_v4().simple()))
    }
}

/// Read-only catalog entry. Seeded out-of-band; the pipeline treats the
/// master catalog as append-only and never mutates it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterRuleSet {
    pub id: MasterRuleSetId,
    pub name: String,
    pub category_id: CategoryId,
    pub description: Option<String>,
    pub version: i64,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasterRuleItemId(pub String);

impl MasterRuleItemId {
    pub fn generate() -> Self {
        Self(format!("MRI-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterRuleItem {
    pub id: MasterRuleItemId,
    pub master_rule_set_id: MasterRuleSetId,
    pub key: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub default_value: Option<Decimal>,
    /// Free-text placeholder for derived rates. Stored and carried through
    /// untouched; never evaluated.
    pub formula: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSetId(pub String);

impl RuleSetId {
    pub fn generate() -> Self {
        Self(format!("RS-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Project-scoped working copy of one master rule set, created fresh for
/// every pipeline run. Once a BOQ has been computed from a rule set the set
/// is never rewritten in place; corrections go through a new attempt and a
/// new materialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: RuleSetId,
    pub user_id: String,
    pub project_id: Option<String>,
    pub name: String,
    pub master_rule_set_id: MasterRuleSetId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleItemId(pub String);

impl RuleItemId {
    pub fn generate() -> Self {
        Self(format!("RI-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleItem {
    pub id: RuleItemId,
    pub rule_set_id: RuleSetId,
    /// Inherited from the owning master set at clone time; immutable after.
    pub category_id: Option<CategoryId>,
    pub key: String,
    pub value: Option<Decimal>,
    pub unit: Option<String>,
    pub rate_basis: Option<RateBasis>,
    pub resolved_rate: Option<Decimal>,
    pub description: Option<String>,
    pub formula: Option<String>,
}

//! Provenance assembly.
//!
//! One JSON blob per BOQ records how the selection was made and the raw
//! items of every rule set used, so a reviewer can reconstruct a compute
//! run from the BOQ row alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::SelectionPath;
use crate::domain::rules::RuleItem;
use crate::errors::ApplicationError;
use crate::materializer::MaterializedRuleSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSetProvenance {
    pub rule_set_id: String,
    pub name: String,
    pub master_rule_set_id: String,
    pub items: Vec<RuleItemProvenance>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleItemProvenance {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// The blob stored as `BOQ.compute_json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(flatten)]
    pub selection: SelectionPath,
    pub selected_names: Vec<String>,
    pub rule_sets: Vec<RuleSetProvenance>,
}

impl RuleItemProvenance {
    fn from_item(item: &RuleItem) -> Self {
        Self {
            key: item.key.clone(),
            unit: item.unit.clone(),
            value: item.value.map(|value| value.to_string()),
        }
    }
}

pub fn assemble(selection: SelectionPath, rule_sets: &[MaterializedRuleSet]) -> Provenance {
    Provenance {
        selection,
        selected_names: rule_sets.iter().map(|set| set.rule_set.name.clone()).collect(),
        rule_sets: rule_sets
            .iter()
            .map(|set| RuleSetProvenance {
                rule_set_id: set.rule_set.id.0.clone(),
                name: set.rule_set.name.clone(),
                master_rule_set_id: set.rule_set.master_rule_set_id.0.clone(),
                items: set.items.iter().map(RuleItemProvenance::from_item).collect(),
            })
            .collect(),
    }
}

impl Provenance {
    pub fn to_json(&self) -> Result<Value, ApplicationError> {
        serde_json::to_value(self)
            .map_err(|error| ApplicationError::Persistence(format!("provenance encode: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::catalog::SelectionPath;
    use crate::domain::rules::{
        CategoryId, MasterRuleItem, MasterRuleItemId, MasterRuleSet, MasterRuleSetId,
    };
    use crate::materializer::materialize;

    use super::assemble;

    #[test]
    fn blob_carries_selection_path_and_raw_items() {
        let master = MasterRuleSet {
            id: MasterRuleSetId("MRS-slab".to_string()),
            name: "CC-RCC-SLAB-M20".to_string(),
            category_id: CategoryId("CAT-cc".to_string()),
            description: None,
            version: 1,
            is_active: true,
        };
        let items = vec![MasterRuleItem {
            id: MasterRuleItemId::generate(),
            master_rule_set_id: master.id.clone(),
            key: "slab_thickness_m".to_string(),
            unit: Some("m".to_string()),
            description: None,
            default_value: Some(Decimal::new(12, 2)),
            formula: None,
        }];
        let materialized = materialize("user-1", None, &master, &items, Utc::now());

        let provenance = assemble(
            SelectionPath::FallbackDefaults { reason: "empty_selection".to_string() },
            std::slice::from_ref(&materialized),
        );
        let json = provenance.to_json().expect("encodes");

        assert_eq!(json["path"], "fallback_defaults");
        assert_eq!(json["selected_names"][0], "CC-RCC-SLAB-M20");
        assert_eq!(json["rule_sets"][0]["items"][0]["key"], "slab_thickness_m");
        assert_eq!(json["rule_sets"][0]["items"][0]["value"], "0.12");
        assert_eq!(json["rule_sets"][0]["rule_set_id"], materialized.rule_set.id.0);
    }
}

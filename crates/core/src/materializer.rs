//! Rule set materialization: cloning selected master rule sets into
//! project-scoped working copies.
//!
//! Every pipeline run gets fresh copies with fresh identifiers. The master
//! catalog is never referenced by the compute stage directly; edits to a
//! working copy can never leak back into the catalog.

use chrono::{DateTime, Utc};

use crate::domain::rules::{
    MasterRuleItem, MasterRuleSet, RuleItem, RuleItemId, RuleSet, RuleSetId,
};
use crate::units::split_compound_unit;

/// One working copy plus its cloned items, ready to persist.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterializedRuleSet {
    pub rule_set: RuleSet,
    pub items: Vec<RuleItem>,
}

/// Clone one master rule set for a (user, project) scope.
///
/// Item values start from the master defaults, the compound unit is split
/// into its unit part and rate basis, and the resolved rate snapshot equals
/// the starting value. Formulas are carried through verbatim.
pub fn materialize(
    user_id: &str,
    project_id: Option<&str>,
    master: &MasterRuleSet,
    master_items: &[MasterRuleItem],
    created_at: DateTime<Utc>,
) -> MaterializedRuleSet {
    let rule_set = RuleSet {
        id: RuleSetId::generate(),
        user_id: user_id.to_string(),
        project_id: project_id.map(str::to_string),
        name: master.name.clone(),
        master_rule_set_id: master.id.clone(),
        created_at,
    };

    let items = master_items
        .iter()
        .filter(|item| item.master_rule_set_id == master.id)
        .map(|item| {
            let (unit, rate_basis) = match item.unit.as_deref() {
                Some(unit) => {
                    let (unit_part, basis) = split_compound_unit(unit);
                    (Some(unit_part), basis)
                }
                None => (None, None),
            };
            RuleItem {
                id: RuleItemId::generate(),
                rule_set_id: rule_set.id.clone(),
                category_id: Some(master.category_id.clone()),
                key: item.key.clone(),
                value: item.default_value,
                unit,
                rate_basis,
                resolved_rate: item.default_value,
                description: item.description.clone(),
                formula: item.formula.clone(),
            }
        })
        .collect();

    MaterializedRuleSet { rule_set, items }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::rules::{
        CategoryId, MasterRuleItem, MasterRuleItemId, MasterRuleSet, MasterRuleSetId,
    };
    use crate::units::RateBasis;

    use super::materialize;

    fn master() -> MasterRuleSet {
        MasterRuleSet {
            id: MasterRuleSetId("MRS-slab".to_string()),
            name: "CC-RCC-SLAB-M20".to_string(),
            category_id: CategoryId("CAT-cc".to_string()),
            description: None,
            version: 1,
            is_active: true,
        }
    }

    fn master_item(key: &str, unit: Option<&str>, default: Option<Decimal>) -> MasterRuleItem {
        MasterRuleItem {
            id: MasterRuleItemId::generate(),
            master_rule_set_id: MasterRuleSetId("MRS-slab".to_string()),
            key: key.to_string(),
            unit: unit.map(str::to_string),
            description: None,
            default_value: default,
            formula: None,
        }
    }

    #[test]
    fn cloned_items_split_units_and_keep_defaults() {
        let items = vec![
            master_item("cement_bags_per_m3", Some("bags_per_m3"), Some(Decimal::new(74, 1))),
            master_item("slab_thickness_m", Some("m"), Some(Decimal::new(12, 2))),
        ];

        let materialized = materialize("user-1", Some("proj-1"), &master(), &items, Utc::now());

        assert_eq!(materialized.rule_set.name, "CC-RCC-SLAB-M20");
        assert_eq!(materialized.items.len(), 2);

        let cement = &materialized.items[0];
        assert_eq!(cement.unit.as_deref(), Some("bags"));
        assert_eq!(cement.rate_basis, Some(RateBasis::PerCubicMetre));
        assert_eq!(cement.value, Some(Decimal::new(74, 1)));
        assert_eq!(cement.resolved_rate, Some(Decimal::new(74, 1)));
        assert_eq!(cement.category_id, Some(CategoryId("CAT-cc".to_string())));

        let thickness = &materialized.items[1];
        assert_eq!(thickness.unit.as_deref(), Some("m"));
        assert_eq!(thickness.rate_basis, None);
    }

    #[test]
    fn each_materialization_gets_fresh_identifiers() {
        let items = vec![master_item("steel_kg_per_m3", Some("kg_per_m3"), Some(Decimal::from(80)))];

        let first = materialize("user-1", None, &master(), &items, Utc::now());
        let second = materialize("user-1", None, &master(), &items, Utc::now());

        assert_ne!(first.rule_set.id, second.rule_set.id);
        assert_ne!(first.items[0].id, second.items[0].id);
        assert_eq!(first.items[0].rule_set_id, first.rule_set.id);
    }

    #[test]
    fn items_from_other_masters_are_excluded() {
        let mut foreign = master_item("grout_kg_per_m2", Some("kg_per_m2"), Some(Decimal::new(5, 1)));
        foreign.master_rule_set_id = MasterRuleSetId("MRS-other".to_string());
        let items =
            vec![master_item("slab_thickness_m", Some("m"), Some(Decimal::new(12, 2))), foreign];

        let materialized = materialize("user-1", None, &master(), &items, Utc::now());
        assert_eq!(materialized.items.len(), 1);
        assert_eq!(materialized.items[0].key, "slab_thickness_m");
    }
}

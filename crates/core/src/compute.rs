//! BOQ quantity computation.
//!
//! Every line is a single exact multiplication, `metric * rate`, recorded
//! with a trace that reproduces its operands. Rates come from the
//! materialized rule items first and fall back to master catalog defaults.
//! Formula-only items have no numeric rate and never produce a line.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::domain::boq::CalculationTrace;
use crate::domain::rules::{CategoryId, RuleItem, RuleItemId};
use crate::metrics::{stringify_metrics, FLOOR_AREA_M2, SLAB_VOLUME_M3};
use crate::units::{split_compound_unit, RateBasis};

/// Master catalog defaults indexed as category name -> rule key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MasterDefaults {
    by_category: BTreeMap<String, BTreeMap<String, MasterDefault>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MasterDefault {
    pub unit: Option<String>,
    pub default_value: Option<Decimal>,
}

impl MasterDefaults {
    pub fn insert(
        &mut self,
        category_name: &str,
        key: &str,
        unit: Option<String>,
        default_value: Option<Decimal>,
    ) {
        self.by_category
            .entry(category_name.to_string())
            .or_default()
            .insert(key.to_string(), MasterDefault { unit, default_value });
    }

    pub fn lookup(&self, category_name: Option<&str>, key: &str) -> Option<&MasterDefault> {
        self.by_category.get(category_name?)?.get(key)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub unit: String,
    pub basis: Option<RateBasis>,
}

/// Resolve the effective rate for one rule item.
///
/// Precedence per field: the rule item's own value/unit, then the master
/// default for the same key under the item's category. A compound unit is
/// split into unit part and basis when the item carries no explicit basis.
/// Items with no numeric rate or no unit resolve to `None`.
pub fn resolve_rate(
    rule: &RuleItem,
    category_name: Option<&str>,
    defaults: &MasterDefaults,
) -> Option<ResolvedRate> {
    let master = defaults.lookup(category_name, &rule.key);

    let rate = rule
        .value
        .or_else(|| master.and_then(|default| default.default_value))?;
    let unit = rule
        .unit
        .clone()
        .or_else(|| master.and_then(|default| default.unit.clone()))?;

    let (unit, basis) = match rule.rate_basis {
        Some(basis) => (unit, Some(basis)),
        None => split_compound_unit(&unit),
    };

    Some(ResolvedRate { rate, unit, basis })
}

/// Which metric drives a material line and which rule key supplies its rate.
#[derive(Clone, Copy, Debug)]
pub struct MaterialSpec {
    pub material_name: &'static str,
    pub rate_key: &'static str,
    pub metric: &'static str,
}

/// The fixed metric-to-material mapping. A line is emitted only when the
/// driving metric exists and its rate key resolves.
pub const MATERIAL_TABLE: [MaterialSpec; 8] = [
    MaterialSpec { material_name: "Cement (bags)", rate_key: "cement_bags_per_m3", metric: SLAB_VOLUME_M3 },
    MaterialSpec { material_name: "Fine Sand (m3)", rate_key: "sand_m3_per_m3", metric: SLAB_VOLUME_M3 },
    MaterialSpec {
        material_name: "Coarse Aggregate (m3)",
        rate_key: "aggregate_m3_per_m3",
        metric: SLAB_VOLUME_M3,
    },
    MaterialSpec { material_name: "Steel (kg)", rate_key: "steel_kg_per_m3", metric: SLAB_VOLUME_M3 },
    MaterialSpec { material_name: "Shuttering (m2)", rate_key: "shuttering_m2_per_m3", metric: SLAB_VOLUME_M3 },
    MaterialSpec { material_name: "Admixture (L)", rate_key: "admixture_L_per_m3", metric: SLAB_VOLUME_M3 },
    MaterialSpec { material_name: "Tile Adhesive (kg)", rate_key: "adhesive_kg_per_m2", metric: FLOOR_AREA_M2 },
    MaterialSpec { material_name: "Tile Grout (kg)", rate_key: "grout_kg_per_m2", metric: FLOOR_AREA_M2 },
];

/// One computed BOQ line before persistence assigns it to a BOQ.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputedLine {
    pub rule_item_id: RuleItemId,
    pub category_id: Option<CategoryId>,
    pub material_name: String,
    pub quantity: Decimal,
    pub unit: String,
    pub quantity_basis: RateBasis,
    pub calculation_trace: CalculationTrace,
}

/// Walk the material table against the active rules and derived metrics.
///
/// `key_category` maps each rule key to its category name so rate fallback
/// can find the right master defaults.
pub fn compute_items(
    rules_by_key: &BTreeMap<String, RuleItem>,
    key_category: &BTreeMap<String, String>,
    metrics: &BTreeMap<String, Decimal>,
    defaults: &MasterDefaults,
) -> Vec<ComputedLine> {
    let trace_common = stringify_metrics(metrics);
    let mut lines = Vec::new();

    for spec in MATERIAL_TABLE {
        let Some(rule) = rules_by_key.get(spec.rate_key) else { continue };
        let Some(metric_value) = metrics.get(spec.metric).copied() else { continue };
        let category_name = key_category.get(spec.rate_key).map(String::as_str);
        let Some(resolved) = resolve_rate(rule, category_name, defaults) else { continue };

        let quantity = metric_value * resolved.rate;
        lines.push(ComputedLine {
            rule_item_id: rule.id.clone(),
            category_id: rule.category_id.clone(),
            material_name: spec.material_name.to_string(),
            quantity,
            unit: resolved.unit.clone(),
            quantity_basis: RateBasis::Absolute,
            calculation_trace: CalculationTrace {
                metrics: trace_common.clone(),
                metric: spec.metric.to_string(),
                metric_value: metric_value.to_string(),
                rate_key: spec.rate_key.to_string(),
                rate: resolved.rate.to_string(),
                unit: resolved.unit,
            },
        });
    }

    lines
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use crate::domain::rules::{RuleItem, RuleItemId, RuleSetId};
    use crate::metrics::{FLOOR_AREA_M2, SLAB_VOLUME_M3};
    use crate::units::RateBasis;

    use super::{compute_items, resolve_rate, MasterDefaults};

    fn rule(key: &str, value: Option<&str>, unit: Option<&str>) -> RuleItem {
        RuleItem {
            id: RuleItemId::generate(),
            rule_set_id: RuleSetId("RS-test".to_string()),
            category_id: None,
            key: key.to_string(),
            value: value.map(|v| v.parse().expect("decimal")),
            unit: unit.map(str::to_string),
            rate_basis: None,
            resolved_rate: None,
            description: None,
            formula: None,
        }
    }

    fn dec(text: &str) -> Decimal {
        text.parse().expect("decimal")
    }

    #[test]
    fn rule_value_beats_master_default() {
        let mut defaults = MasterDefaults::default();
        defaults.insert(
            "cement_concrete_work",
            "cement_bags_per_m3",
            Some("bags_per_m3".to_string()),
            Some(dec("7.4")),
        );

        let overridden = rule("cement_bags_per_m3", Some("8.1"), Some("bags_per_m3"));
        let resolved = resolve_rate(&overridden, Some("cement_concrete_work"), &defaults)
            .expect("rate resolves");
        assert_eq!(resolved.rate, dec("8.1"));

        let bare = rule("cement_bags_per_m3", None, None);
        let resolved =
            resolve_rate(&bare, Some("cement_concrete_work"), &defaults).expect("rate resolves");
        assert_eq!(resolved.rate, dec("7.4"));
        assert_eq!(resolved.unit, "bags");
        assert_eq!(resolved.basis, Some(RateBasis::PerCubicMetre));
    }

    #[test]
    fn unresolvable_rate_yields_no_line() {
        let defaults = MasterDefaults::default();
        assert_eq!(resolve_rate(&rule("steel_kg_per_m3", None, None), None, &defaults), None);
        // A value without any unit is equally unusable.
        assert_eq!(
            resolve_rate(&rule("steel_kg_per_m3", Some("80"), None), None, &defaults),
            None
        );
    }

    #[test]
    fn quantity_is_metric_times_rate_and_the_trace_reproduces_it() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "cement_bags_per_m3".to_string(),
            rule("cement_bags_per_m3", Some("7.4"), Some("bags_per_m3")),
        );

        let mut metrics = BTreeMap::new();
        metrics.insert(FLOOR_AREA_M2.to_string(), dec("20"));
        metrics.insert(SLAB_VOLUME_M3.to_string(), dec("2.40"));

        let lines =
            compute_items(&rules, &BTreeMap::new(), &metrics, &MasterDefaults::default());

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.material_name, "Cement (bags)");
        assert_eq!(line.quantity, dec("17.760"));
        assert_eq!(line.unit, "bags");
        assert_eq!(line.quantity_basis, RateBasis::Absolute);

        let trace = &line.calculation_trace;
        assert_eq!(trace.metric, SLAB_VOLUME_M3);
        assert_eq!(
            trace.metric_value.parse::<Decimal>().expect("decimal")
                * trace.rate.parse::<Decimal>().expect("decimal"),
            line.quantity
        );
        assert_eq!(trace.metrics[FLOOR_AREA_M2], "20");
    }

    #[test]
    fn slab_lines_are_gated_on_the_volume_metric() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "cement_bags_per_m3".to_string(),
            rule("cement_bags_per_m3", Some("7.4"), Some("bags_per_m3")),
        );
        rules.insert(
            "adhesive_kg_per_m2".to_string(),
            rule("adhesive_kg_per_m2", Some("4.0"), Some("kg_per_m2")),
        );

        let mut metrics = BTreeMap::new();
        metrics.insert(FLOOR_AREA_M2.to_string(), dec("20"));

        let lines =
            compute_items(&rules, &BTreeMap::new(), &metrics, &MasterDefaults::default());

        let names: Vec<&str> = lines.iter().map(|line| line.material_name.as_str()).collect();
        assert_eq!(names, vec!["Tile Adhesive (kg)"]);
        assert_eq!(lines[0].quantity, dec("80.0"));
    }

    #[test]
    fn keys_outside_the_selected_rules_produce_nothing() {
        let mut metrics = BTreeMap::new();
        metrics.insert(FLOOR_AREA_M2.to_string(), dec("20"));
        metrics.insert(SLAB_VOLUME_M3.to_string(), dec("2.40"));

        let lines = compute_items(
            &BTreeMap::new(),
            &BTreeMap::new(),
            &metrics,
            &MasterDefaults::default(),
        );
        assert!(lines.is_empty());
    }
}

//! Derived geometric metrics.
//!
//! Metrics are the bridge between normalized room geometry and rate keys:
//! compute multiplies a metric by a rate, nothing else. All arithmetic is
//! `Decimal`, so room ordering and unit mixes cannot change a result.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::domain::rules::RuleItem;
use crate::geometry::GeometryReport;

pub const FLOOR_AREA_M2: &str = "floor_area_m2";
pub const SLAB_VOLUME_M3: &str = "slab_volume_m3";

/// Rule key that supplies the slab thickness for the volume metric.
pub const SLAB_THICKNESS_KEY: &str = "slab_thickness_m";

/// Derive metrics from normalized geometry and the active rule items.
///
/// Floor area always appears, as the sum over rooms that carry both a
/// length and a width. Slab volume appears only when a `slab_thickness_m`
/// rule with a value is in scope.
pub fn derive_metrics(
    report: &GeometryReport,
    rules_by_key: &BTreeMap<String, RuleItem>,
) -> BTreeMap<String, Decimal> {
    let mut metrics = BTreeMap::new();

    let mut floor_area = Decimal::ZERO;
    for room in &report.rooms {
        if let (Some(length_m), Some(width_m)) = (room.length_m, room.width_m) {
            floor_area += length_m * width_m;
        }
    }
    metrics.insert(FLOOR_AREA_M2.to_string(), floor_area);

    if let Some(thickness) = rules_by_key.get(SLAB_THICKNESS_KEY).and_then(|rule| rule.value) {
        metrics.insert(SLAB_VOLUME_M3.to_string(), floor_area * thickness);
    }

    metrics
}

/// Stringify metrics exactly for persistence on the attempt and in traces.
pub fn stringify_metrics(metrics: &BTreeMap<String, Decimal>) -> BTreeMap<String, String> {
    metrics.iter().map(|(key, value)| (key.clone(), value.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use crate::domain::rules::{RuleItem, RuleItemId, RuleSetId};
    use crate::geometry::{GeometryReport, NormalizedRoom};

    use super::{derive_metrics, stringify_metrics, FLOOR_AREA_M2, SLAB_VOLUME_M3};

    fn room(length: &str, width: &str) -> NormalizedRoom {
        NormalizedRoom {
            length_m: Some(length.parse().expect("decimal")),
            width_m: Some(width.parse().expect("decimal")),
            ..NormalizedRoom::default()
        }
    }

    fn thickness_rule(value: &str) -> BTreeMap<String, RuleItem> {
        let mut rules = BTreeMap::new();
        rules.insert(
            "slab_thickness_m".to_string(),
            RuleItem {
                id: RuleItemId::generate(),
                rule_set_id: RuleSetId("RS-test".to_string()),
                category_id: None,
                key: "slab_thickness_m".to_string(),
                value: Some(value.parse().expect("decimal")),
                unit: Some("m".to_string()),
                rate_basis: None,
                resolved_rate: None,
                description: None,
                formula: None,
            },
        );
        rules
    }

    #[test]
    fn floor_area_sums_rooms_and_is_order_independent() {
        let a = GeometryReport { rooms: vec![room("4", "5"), room("3.5", "2")], ..GeometryReport::default() };
        let b = GeometryReport { rooms: vec![room("3.5", "2"), room("4", "5")], ..GeometryReport::default() };

        let metrics_a = derive_metrics(&a, &BTreeMap::new());
        let metrics_b = derive_metrics(&b, &BTreeMap::new());

        assert_eq!(metrics_a[FLOOR_AREA_M2], Decimal::from(27));
        assert_eq!(metrics_a, metrics_b);
    }

    #[test]
    fn rooms_missing_a_dimension_are_skipped_in_the_sum() {
        let report = GeometryReport {
            rooms: vec![
                room("4", "5"),
                NormalizedRoom { length_m: Some(Decimal::from(9)), ..NormalizedRoom::default() },
            ],
            ..GeometryReport::default()
        };

        let metrics = derive_metrics(&report, &BTreeMap::new());
        assert_eq!(metrics[FLOOR_AREA_M2], Decimal::from(20));
    }

    #[test]
    fn slab_volume_requires_a_thickness_rule() {
        let report = GeometryReport { rooms: vec![room("4", "5")], ..GeometryReport::default() };

        let without = derive_metrics(&report, &BTreeMap::new());
        assert!(!without.contains_key(SLAB_VOLUME_M3));

        let with = derive_metrics(&report, &thickness_rule("0.12"));
        assert_eq!(with[SLAB_VOLUME_M3], "2.40".parse::<Decimal>().expect("decimal"));
    }

    #[test]
    fn metrics_stringify_exactly() {
        let report = GeometryReport { rooms: vec![room("4", "5")], ..GeometryReport::default() };
        let strings = stringify_metrics(&derive_metrics(&report, &thickness_rule("0.12")));

        assert_eq!(strings[FLOOR_AREA_M2], "20");
        assert_eq!(strings[SLAB_VOLUME_M3], "2.40");
    }
}

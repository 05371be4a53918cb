//! Read-side queries for BOQ export.
//!
//! The export is built purely from persisted rows; the pipeline does not
//! need to be re-run to produce it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;

use takeoff_core::domain::attempt::AttemptId;
use takeoff_core::domain::boq::{Boq, BoqId, BoqStatus};

use super::RepositoryError;
use crate::DbPool;

/// One row of the BOQ listing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoqExportRow {
    pub category: String,
    pub rule_set: String,
    pub material_name: String,
    pub rule_item_key: String,
    /// The formula when one exists, otherwise the rule value.
    pub proportion: String,
    pub unit: String,
    pub quantity: String,
}

pub async fn fetch_boq(pool: &DbPool, id: &BoqId) -> Result<Option<Boq>, RepositoryError> {
    let row = sqlx::query(
        "SELECT boq_id, user_id, project_id, validation_attempt_id, status, compute_json,
                created_at
         FROM boq WHERE boq_id = ?",
    )
    .bind(&id.0)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status = BoqStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown boq status `{status_str}`")))?;
    let compute_json: Option<String> =
        row.try_get("compute_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Some(Boq {
        id: BoqId(row.try_get("boq_id").map_err(|e| RepositoryError::Decode(e.to_string()))?),
        user_id: row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        project_id: row.try_get("project_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        validation_attempt_id: AttemptId(
            row.try_get("validation_attempt_id")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        status,
        compute_json: compute_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RepositoryError::Decode(format!("timestamp `{created_at}`: {e}")))?,
    }))
}

pub async fn fetch_export_rows(
    pool: &DbPool,
    id: &BoqId,
) -> Result<Vec<BoqExportRow>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT IFNULL(bc.name, 'Unknown') AS category,
                IFNULL(rs.name, '') AS rule_set,
                bi.material_name,
                IFNULL(ri.key, '') AS rule_item_key,
                ri.formula,
                ri.value,
                bi.unit,
                bi.quantity
         FROM boq_items bi
         LEFT JOIN boq_categories bc ON bc.category_id = bi.category_id
         LEFT JOIN rule_items ri ON ri.rule_item_id = bi.rule_item_id
         LEFT JOIN rule_sets rs ON rs.rule_set_id = ri.rule_set_id
         WHERE bi.boq_id = ?
         ORDER BY bi.material_name",
    )
    .bind(&id.0)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let formula: Option<String> =
                row.try_get("formula").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let value: Option<String> =
                row.try_get("value").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            Ok(BoqExportRow {
                category: row
                    .try_get("category")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                rule_set: row
                    .try_get("rule_set")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                material_name: row
                    .try_get("material_name")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                rule_item_key: row
                    .try_get("rule_item_key")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                proportion: formula.or(value).unwrap_or_default(),
                unit: row.try_get("unit").map_err(|e| RepositoryError::Decode(e.to_string()))?,
                quantity: row
                    .try_get("quantity")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
            })
        })
        .collect()
}

const CSV_HEADER: &[&str] = &[
    "Category",
    "Rule Set",
    "Material Name",
    "Rule Item Key",
    "Proportion/Formula",
    "Unit",
    "Quantity",
];

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

pub fn render_csv(rows: &[BoqExportRow]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push('\n');
    for row in rows {
        let fields = [
            csv_field(&row.category),
            csv_field(&row.rule_set),
            csv_field(&row.material_name),
            csv_field(&row.rule_item_key),
            csv_field(&row.proportion),
            csv_field(&row.unit),
            csv_field(&row.quantity),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use takeoff_core::catalog::seed_entities;
    use takeoff_core::domain::attempt::{AttemptId, ValidationAttempt, ValidationStatus};
    use takeoff_core::domain::boq::{Boq, BoqId, BoqItem, BoqItemId, BoqStatus};
    use takeoff_core::materializer::materialize;
    use takeoff_core::pipeline::PipelineStore;
    use takeoff_core::units::RateBasis;

    use super::{fetch_boq, fetch_export_rows, render_csv, BoqExportRow};
    use crate::repositories::SqlPipelineStore;
    use crate::{connect_with_settings, fixtures, migrations};

    #[tokio::test]
    async fn export_rows_join_category_rule_set_and_rule_item() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        fixtures::seed_catalog(&pool).await.expect("seed");
        let store = SqlPipelineStore::new(pool.clone());

        let attempt = ValidationAttempt {
            id: AttemptId::generate(),
            user_id: "user-1".to_string(),
            project_id: None,
            parent_attempt_id: None,
            status: ValidationStatus::Valid,
            raw_input_text: "a 4x5 room".to_string(),
            extracted_payload: None,
            missing_fields: vec![],
            invalid_fields: vec![],
            unit_warnings: vec![],
            derived_metrics: BTreeMap::new(),
            created_at: Utc::now(),
        };
        store.insert_attempt(&attempt).await.expect("insert attempt");

        let masters = store.list_master_rule_sets().await.expect("masters");
        let master_items = store.list_master_rule_items().await.expect("items");
        let slab = masters.iter().find(|m| m.name == "CC-RCC-SLAB-M20").expect("slab");
        let materialized = materialize("user-1", None, slab, &master_items, Utc::now());
        store.insert_rule_set(&materialized).await.expect("insert rule set");

        let cement_rule = materialized
            .items
            .iter()
            .find(|item| item.key == "cement_bags_per_m3")
            .expect("cement rule");

        let boq = Boq {
            id: BoqId::generate(),
            user_id: "user-1".to_string(),
            project_id: None,
            validation_attempt_id: attempt.id.clone(),
            status: BoqStatus::Draft,
            compute_json: None,
            created_at: Utc::now(),
        };
        let item = BoqItem {
            id: BoqItemId::generate(),
            boq_id: boq.id.clone(),
            category_id: cement_rule.category_id.clone(),
            rule_item_id: Some(cement_rule.id.clone()),
            material_name: "Cement (bags)".to_string(),
            quantity: "17.760".parse().expect("decimal"),
            unit: "bags".to_string(),
            quantity_basis: RateBasis::Absolute,
            notes: None,
            calculation_trace: None,
        };
        store.insert_boq(&boq, std::slice::from_ref(&item)).await.expect("insert boq");

        let loaded = fetch_boq(&pool, &boq.id).await.expect("fetch").expect("boq exists");
        assert_eq!(loaded.status, BoqStatus::Draft);

        let rows = fetch_export_rows(&pool, &boq.id).await.expect("export rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, "cement_concrete_work");
        assert_eq!(rows[0].rule_set, "CC-RCC-SLAB-M20");
        assert_eq!(rows[0].rule_item_key, "cement_bags_per_m3");
        assert_eq!(rows[0].proportion, "7.4");
        assert_eq!(rows[0].quantity, "17.760");
    }

    #[test]
    fn csv_rendering_quotes_fields_that_need_it() {
        let rows = vec![BoqExportRow {
            category: "flooring".to_string(),
            rule_set: "FLR-TILE-600x600-VIT".to_string(),
            material_name: "Tile Adhesive, rapid-set".to_string(),
            rule_item_key: "adhesive_kg_per_m2".to_string(),
            proportion: "4.0".to_string(),
            unit: "kg".to_string(),
            quantity: "80.0".to_string(),
        }];

        let csv = render_csv(&rows);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Category,Rule Set,Material Name,Rule Item Key,Proportion/Formula,Unit,Quantity")
        );
        assert_eq!(
            lines.next(),
            Some(
                "flooring,FLR-TILE-600x600-VIT,\"Tile Adhesive, rapid-set\",adhesive_kg_per_m2,4.0,kg,80.0"
            )
        );
    }

    #[test]
    fn seed_entities_are_available_for_export_tests() {
        // Guards the fixture assumption above: the slab set exists in seed data.
        let (_, masters, _) = seed_entities();
        assert!(masters.iter().any(|m| m.name == "CC-RCC-SLAB-M20"));
    }
}

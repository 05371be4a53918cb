//! Sqlite-backed implementation of the pipeline persistence seam.
//!
//! Decimal columns are TEXT so the stored values stay exact; structured
//! fields (payloads, field lists, metrics, traces) are serialized JSON.
//! BOQ persistence additionally rolls each produced material up into the
//! `benchmark_materials` table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::Row;

use takeoff_core::domain::attempt::{AttemptId, ValidationAttempt, ValidationStatus};
use takeoff_core::domain::boq::{Boq, BoqId, BoqItem};
use takeoff_core::domain::rules::{
    BoqCategory, CategoryId, MasterRuleItem, MasterRuleItemId, MasterRuleSet, MasterRuleSetId,
};
use takeoff_core::materializer::MaterializedRuleSet;
use takeoff_core::pipeline::{PipelineStore, StoreError};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlPipelineStore {
    pool: DbPool,
}

impl SqlPipelineStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{raw}`: {e}")))
}

fn parse_decimal(raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>()
        .map_err(|e| RepositoryError::Decode(format!("decimal `{raw}`: {e}")))
}

fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> Result<ValidationAttempt, RepositoryError> {
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status = ValidationStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown attempt status `{status_str}`")))?;

    let extracted_payload: Option<String> =
        row.try_get("extracted_payload").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let missing_fields: String =
        row.try_get("missing_fields").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let invalid_fields: String =
        row.try_get("invalid_fields").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unit_warnings: String =
        row.try_get("unit_warnings").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let derived_metrics: String =
        row.try_get("derived_metrics").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let parent_attempt_id: Option<String> =
        row.try_get("parent_attempt_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ValidationAttempt {
        id: AttemptId(row.try_get("attempt_id").map_err(|e| RepositoryError::Decode(e.to_string()))?),
        user_id: row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        project_id: row.try_get("project_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        parent_attempt_id: parent_attempt_id.map(AttemptId),
        status,
        raw_input_text: row
            .try_get("raw_input_text")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        extracted_payload: extracted_payload.as_deref().map(decode_json).transpose()?,
        missing_fields: decode_json(&missing_fields)?,
        invalid_fields: decode_json(&invalid_fields)?,
        unit_warnings: decode_json(&unit_warnings)?,
        derived_metrics: decode_json(&derived_metrics)?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_category(row: &sqlx::sqlite::SqliteRow) -> Result<BoqCategory, RepositoryError> {
    Ok(BoqCategory {
        id: CategoryId(
            row.try_get("category_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        name: row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        description: row
            .try_get("description")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

fn row_to_master_set(row: &sqlx::sqlite::SqliteRow) -> Result<MasterRuleSet, RepositoryError> {
    Ok(MasterRuleSet {
        id: MasterRuleSetId(
            row.try_get("master_rule_set_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        name: row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        category_id: CategoryId(
            row.try_get("category_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        description: row
            .try_get("description")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        version: row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        is_active: row
            .try_get::<i64, _>("is_active")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?
            != 0,
    })
}

fn row_to_master_item(row: &sqlx::sqlite::SqliteRow) -> Result<MasterRuleItem, RepositoryError> {
    let default_value: Option<String> =
        row.try_get("default_value").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(MasterRuleItem {
        id: MasterRuleItemId(
            row.try_get("master_rule_item_id")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        master_rule_set_id: MasterRuleSetId(
            row.try_get("master_rule_set_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        key: row.try_get("key").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        unit: row.try_get("unit").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        description: row
            .try_get("description")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        default_value: default_value.as_deref().map(parse_decimal).transpose()?,
        formula: row.try_get("formula").map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

impl SqlPipelineStore {
    async fn insert_attempt_inner(
        &self,
        attempt: &ValidationAttempt,
    ) -> Result<(), RepositoryError> {
        let extracted_payload =
            attempt.extracted_payload.as_ref().map(encode_json).transpose()?;
        sqlx::query(
            "INSERT INTO validation_attempts (attempt_id, user_id, project_id, parent_attempt_id,
                                              status, raw_input_text, extracted_payload,
                                              missing_fields, invalid_fields, unit_warnings,
                                              derived_metrics, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attempt.id.0)
        .bind(&attempt.user_id)
        .bind(&attempt.project_id)
        .bind(attempt.parent_attempt_id.as_ref().map(|id| id.0.as_str()))
        .bind(attempt.status.as_str())
        .bind(&attempt.raw_input_text)
        .bind(&extracted_payload)
        .bind(encode_json(&attempt.missing_fields)?)
        .bind(encode_json(&attempt.invalid_fields)?)
        .bind(encode_json(&attempt.unit_warnings)?)
        .bind(encode_json(&attempt.derived_metrics)?)
        .bind(attempt.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_attempt_inner(
        &self,
        id: &AttemptId,
    ) -> Result<Option<ValidationAttempt>, RepositoryError> {
        let row = sqlx::query(
            "SELECT attempt_id, user_id, project_id, parent_attempt_id, status, raw_input_text,
                    extracted_payload, missing_fields, invalid_fields, unit_warnings,
                    derived_metrics, created_at
             FROM validation_attempts WHERE attempt_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(row_to_attempt(row)?)),
            None => Ok(None),
        }
    }

    async fn insert_rule_set_inner(
        &self,
        materialized: &MaterializedRuleSet,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let set = &materialized.rule_set;
        sqlx::query(
            "INSERT INTO rule_sets (rule_set_id, user_id, project_id, name, master_rule_set_id,
                                    created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&set.id.0)
        .bind(&set.user_id)
        .bind(&set.project_id)
        .bind(&set.name)
        .bind(&set.master_rule_set_id.0)
        .bind(set.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for item in &materialized.items {
            sqlx::query(
                "INSERT INTO rule_items (rule_item_id, rule_set_id, category_id, key, value,
                                         unit, rate_basis, resolved_rate, description, formula)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id.0)
            .bind(&item.rule_set_id.0)
            .bind(item.category_id.as_ref().map(|id| id.0.as_str()))
            .bind(&item.key)
            .bind(item.value.map(|value| value.to_string()))
            .bind(&item.unit)
            .bind(item.rate_basis.map(|basis| basis.as_str()))
            .bind(item.resolved_rate.map(|rate| rate.to_string()))
            .bind(&item.description)
            .bind(&item.formula)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_boq_inner(&self, boq: &Boq, items: &[BoqItem]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let compute_json = boq.compute_json.as_ref().map(encode_json).transpose()?;
        sqlx::query(
            "INSERT INTO boq (boq_id, user_id, project_id, validation_attempt_id, status,
                              compute_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&boq.id.0)
        .bind(&boq.user_id)
        .bind(&boq.project_id)
        .bind(&boq.validation_attempt_id.0)
        .bind(boq.status.as_str())
        .bind(&compute_json)
        .bind(boq.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let now = Utc::now().to_rfc3339();
        for item in items {
            let trace = item.calculation_trace.as_ref().map(encode_json).transpose()?;
            sqlx::query(
                "INSERT INTO boq_items (boq_item_id, boq_id, category_id, rule_item_id,
                                        material_name, quantity, unit, quantity_basis, notes,
                                        calculation_trace)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id.0)
            .bind(&item.boq_id.0)
            .bind(item.category_id.as_ref().map(|id| id.0.as_str()))
            .bind(item.rule_item_id.as_ref().map(|id| id.0.as_str()))
            .bind(&item.material_name)
            .bind(item.quantity.to_string())
            .bind(&item.unit)
            .bind(item.quantity_basis.as_str())
            .bind(&item.notes)
            .bind(&trace)
            .execute(&mut *tx)
            .await?;

            // Benchmark rollup: one row per material, latest quantity wins.
            sqlx::query(
                "INSERT INTO benchmark_materials (material_name, unit, last_quantity,
                                                  source_boq_id, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(material_name) DO UPDATE SET
                     unit = excluded.unit,
                     last_quantity = excluded.last_quantity,
                     source_boq_id = excluded.source_boq_id,
                     updated_at = excluded.updated_at",
            )
            .bind(&item.material_name)
            .bind(&item.unit)
            .bind(item.quantity.to_string())
            .bind(&item.boq_id.0)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PipelineStore for SqlPipelineStore {
    async fn insert_attempt(&self, attempt: &ValidationAttempt) -> Result<(), StoreError> {
        self.insert_attempt_inner(attempt).await.map_err(Into::into)
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<ValidationAttempt>, StoreError> {
        self.get_attempt_inner(id).await.map_err(Into::into)
    }

    async fn set_attempt_metrics(
        &self,
        id: &AttemptId,
        metrics: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let encoded = encode_json(metrics).map_err(StoreError::from)?;
        let result = sqlx::query(
            "UPDATE validation_attempts SET derived_metrics = ? WHERE attempt_id = ?",
        )
        .bind(encoded)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("attempt not found: {id}")));
        }
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<BoqCategory>, StoreError> {
        let rows = sqlx::query(
            "SELECT category_id, name, description FROM boq_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| row_to_category(row).map_err(StoreError::from))
            .collect()
    }

    async fn insert_category(&self, category: &BoqCategory) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO boq_categories (category_id, name, description) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&category.id.0)
        .bind(&category.name)
        .bind(&category.description)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_master_rule_sets(&self) -> Result<Vec<MasterRuleSet>, StoreError> {
        let rows = sqlx::query(
            "SELECT master_rule_set_id, name, category_id, description, version, is_active
             FROM master_rule_sets ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| row_to_master_set(row).map_err(StoreError::from))
            .collect()
    }

    async fn list_master_rule_items(&self) -> Result<Vec<MasterRuleItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT master_rule_item_id, master_rule_set_id, key, unit, description,
                    default_value, formula
             FROM master_rule_items ORDER BY master_rule_set_id, key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| row_to_master_item(row).map_err(StoreError::from))
            .collect()
    }

    async fn insert_rule_set(&self, materialized: &MaterializedRuleSet) -> Result<(), StoreError> {
        self.insert_rule_set_inner(materialized).await.map_err(Into::into)
    }

    async fn insert_boq(&self, boq: &Boq, items: &[BoqItem]) -> Result<(), StoreError> {
        self.insert_boq_inner(boq, items).await.map_err(Into::into)
    }

    async fn set_boq_compute_json(&self, id: &BoqId, blob: &Value) -> Result<(), StoreError> {
        let encoded = encode_json(blob).map_err(StoreError::from)?;
        let result = sqlx::query("UPDATE boq SET compute_json = ? WHERE boq_id = ?")
            .bind(encoded)
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("boq not found: {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;
    use sqlx::Row;

    use takeoff_core::catalog::seed_entities;
    use takeoff_core::domain::attempt::{AttemptId, ValidationAttempt, ValidationStatus};
    use takeoff_core::domain::boq::{Boq, BoqId, BoqItem, BoqItemId, BoqStatus, CalculationTrace};
    use takeoff_core::geometry::{ExtractedPayload, RawDimension, RawRoom};
    use takeoff_core::materializer::materialize;
    use takeoff_core::pipeline::PipelineStore;
    use takeoff_core::units::RateBasis;

    use super::SqlPipelineStore;
    use crate::{connect_with_settings, fixtures, migrations};

    async fn store() -> SqlPipelineStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlPipelineStore::new(pool)
    }

    fn attempt() -> ValidationAttempt {
        let payload = ExtractedPayload {
            rooms: vec![RawRoom {
                length: Some(RawDimension { value: json!(4), unit: "m".to_string() }),
                width: Some(RawDimension { value: json!(5), unit: "m".to_string() }),
                ..RawRoom::default()
            }],
            ..ExtractedPayload::default()
        };
        ValidationAttempt {
            id: AttemptId::generate(),
            user_id: "user-1".to_string(),
            project_id: Some("proj-1".to_string()),
            parent_attempt_id: None,
            status: ValidationStatus::Valid,
            raw_input_text: "one room 4m by 5m".to_string(),
            extracted_payload: Some(payload),
            missing_fields: vec![],
            invalid_fields: vec![],
            unit_warnings: vec![],
            derived_metrics: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn attempt_round_trips_with_payload_and_metrics() {
        let store = store().await;
        let attempt = attempt();

        store.insert_attempt(&attempt).await.expect("insert");
        let loaded = store
            .get_attempt(&attempt.id)
            .await
            .expect("get")
            .expect("attempt exists");

        assert_eq!(loaded.status, ValidationStatus::Valid);
        assert_eq!(loaded.extracted_payload, attempt.extracted_payload);
        assert_eq!(loaded.raw_input_text, attempt.raw_input_text);

        let mut metrics = BTreeMap::new();
        metrics.insert("floor_area_m2".to_string(), "20".to_string());
        store.set_attempt_metrics(&attempt.id, &metrics).await.expect("set metrics");

        let loaded = store
            .get_attempt(&attempt.id)
            .await
            .expect("get")
            .expect("attempt exists");
        assert_eq!(loaded.derived_metrics["floor_area_m2"], "20");
    }

    #[tokio::test]
    async fn full_run_round_trips_through_sqlite() {
        let store = store().await;
        fixtures::seed_catalog(store.pool()).await.expect("seed");

        let masters = store.list_master_rule_sets().await.expect("masters");
        let master_items = store.list_master_rule_items().await.expect("items");
        let slab = masters.iter().find(|m| m.name == "CC-RCC-SLAB-M20").expect("slab set");

        let attempt = attempt();
        store.insert_attempt(&attempt).await.expect("insert attempt");

        let materialized = materialize("user-1", Some("proj-1"), slab, &master_items, Utc::now());
        store.insert_rule_set(&materialized).await.expect("insert rule set");

        let boq = Boq {
            id: BoqId::generate(),
            user_id: "user-1".to_string(),
            project_id: Some("proj-1".to_string()),
            validation_attempt_id: attempt.id.clone(),
            status: BoqStatus::Draft,
            compute_json: None,
            created_at: Utc::now(),
        };
        let item = BoqItem {
            id: BoqItemId::generate(),
            boq_id: boq.id.clone(),
            category_id: Some(slab.category_id.clone()),
            rule_item_id: Some(materialized.items[0].id.clone()),
            material_name: "Cement (bags)".to_string(),
            quantity: "17.760".parse().expect("decimal"),
            unit: "bags".to_string(),
            quantity_basis: RateBasis::Absolute,
            notes: None,
            calculation_trace: Some(CalculationTrace {
                metrics: BTreeMap::new(),
                metric: "slab_volume_m3".to_string(),
                metric_value: "2.40".to_string(),
                rate_key: "cement_bags_per_m3".to_string(),
                rate: "7.4".to_string(),
                unit: "bags".to_string(),
            }),
        };
        store.insert_boq(&boq, std::slice::from_ref(&item)).await.expect("insert boq");
        store
            .set_boq_compute_json(&boq.id, &json!({"path": "fallback_defaults"}))
            .await
            .expect("set blob");

        let stored_quantity = sqlx::query("SELECT quantity FROM boq_items WHERE boq_item_id = ?")
            .bind(&item.id.0)
            .fetch_one(store.pool())
            .await
            .expect("fetch item")
            .get::<String, _>("quantity");
        assert_eq!(stored_quantity, "17.760");

        let blob = sqlx::query("SELECT compute_json FROM boq WHERE boq_id = ?")
            .bind(&boq.id.0)
            .fetch_one(store.pool())
            .await
            .expect("fetch boq")
            .get::<String, _>("compute_json");
        assert!(blob.contains("fallback_defaults"));
    }

    #[tokio::test]
    async fn benchmark_rollup_upserts_per_material() {
        let store = store().await;
        let attempt = attempt();
        store.insert_attempt(&attempt).await.expect("insert attempt");

        let make_boq = |quantity: &str| {
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
                category_id: None,
                rule_item_id: None,
                material_name: "Cement (bags)".to_string(),
                quantity: quantity.parse().expect("decimal"),
                unit: "bags".to_string(),
                quantity_basis: RateBasis::Absolute,
                notes: None,
                calculation_trace: None,
            };
            (boq, item)
        };

        let (first_boq, first_item) = make_boq("17.760");
        store.insert_boq(&first_boq, std::slice::from_ref(&first_item)).await.expect("first");
        let (second_boq, second_item) = make_boq("21.5");
        store.insert_boq(&second_boq, std::slice::from_ref(&second_item)).await.expect("second");

        let rows = sqlx::query(
            "SELECT last_quantity, source_boq_id FROM benchmark_materials
             WHERE material_name = 'Cement (bags)'",
        )
        .fetch_all(store.pool())
        .await
        .expect("fetch rollup");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String, _>("last_quantity"), "21.5");
        assert_eq!(rows[0].get::<String, _>("source_boq_id"), second_boq.id.0);
    }

    #[tokio::test]
    async fn categories_insert_is_name_unique() {
        let store = store().await;
        let (categories, _, _) = seed_entities();
        for category in &categories {
            store.insert_category(category).await.expect("insert");
        }
        // Same names again with fresh ids: ignored, not duplicated.
        let (categories_again, _, _) = seed_entities();
        for category in &categories_again {
            store.insert_category(category).await.expect("re-insert");
        }

        let listed = store.list_categories().await.expect("list");
        assert_eq!(listed.len(), 3);
    }
}

//! Master catalog seeding.
//!
//! Seeding is idempotent: rows are matched by their stable names, existing
//! identifiers are kept, and descriptions/units/defaults are updated in
//! place. Nothing is ever deleted.

use sqlx::Row;

use takeoff_core::catalog::{master_catalog, seed_categories};

use crate::repositories::RepositoryError;
use crate::DbPool;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub categories: usize,
    pub rule_sets: usize,
    pub rule_items: usize,
}

pub async fn seed_catalog(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let mut summary = SeedSummary::default();
    let mut tx = pool.begin().await?;

    for (name, description) in seed_categories() {
        sqlx::query(
            "INSERT INTO boq_categories (category_id, name, description) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET description = excluded.description",
        )
        .bind(takeoff_core::domain::rules::CategoryId::generate().0)
        .bind(name)
        .bind(description)
        .execute(&mut *tx)
        .await?;
        summary.categories += 1;
    }

    for seed in master_catalog() {
        let category_id = sqlx::query("SELECT category_id FROM boq_categories WHERE name = ?")
            .bind(seed.category)
            .fetch_one(&mut *tx)
            .await?
            .get::<String, _>("category_id");

        sqlx::query(
            "INSERT INTO master_rule_sets (master_rule_set_id, name, category_id, description,
                                           version, is_active)
             VALUES (?, ?, ?, ?, 1, 1)
             ON CONFLICT(name) DO UPDATE SET
                 category_id = excluded.category_id,
                 description = excluded.description,
                 is_active = excluded.is_active",
        )
        .bind(takeoff_core::domain::rules::MasterRuleSetId::generate().0)
        .bind(seed.code)
        .bind(&category_id)
        .bind(seed.description)
        .execute(&mut *tx)
        .await?;
        summary.rule_sets += 1;

        let master_rule_set_id =
            sqlx::query("SELECT master_rule_set_id FROM master_rule_sets WHERE name = ?")
                .bind(seed.code)
                .fetch_one(&mut *tx)
                .await?
                .get::<String, _>("master_rule_set_id");

        for item in &seed.items {
            sqlx::query(
                "INSERT INTO master_rule_items (master_rule_item_id, master_rule_set_id, key,
                                                unit, description, default_value, formula)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(master_rule_set_id, key) DO UPDATE SET
                     unit = excluded.unit,
                     description = excluded.description,
                     default_value = excluded.default_value,
                     formula = excluded.formula",
            )
            .bind(takeoff_core::domain::rules::MasterRuleItemId::generate().0)
            .bind(&master_rule_set_id)
            .bind(item.key)
            .bind(item.unit)
            .bind(item.description)
            .bind(item.default_value.map(|value| value.to_string()))
            .bind(item.formula)
            .execute(&mut *tx)
            .await?;
            summary.rule_items += 1;
        }
    }

    tx.commit().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::seed_catalog;
    use crate::{connect_with_settings, migrations};

    async fn counts(pool: &sqlx::SqlitePool) -> (i64, i64, i64) {
        let categories = sqlx::query("SELECT COUNT(*) AS count FROM boq_categories")
            .fetch_one(pool)
            .await
            .expect("count categories")
            .get::<i64, _>("count");
        let sets = sqlx::query("SELECT COUNT(*) AS count FROM master_rule_sets")
            .fetch_one(pool)
            .await
            .expect("count sets")
            .get::<i64, _>("count");
        let items = sqlx::query("SELECT COUNT(*) AS count FROM master_rule_items")
            .fetch_one(pool)
            .await
            .expect("count items")
            .get::<i64, _>("count");
        (categories, sets, items)
    }

    #[tokio::test]
    async fn seeding_twice_is_idempotent_and_keeps_identifiers() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        seed_catalog(&pool).await.expect("first seed");
        let first_counts = counts(&pool).await;
        let first_slab_id =
            sqlx::query("SELECT master_rule_set_id FROM master_rule_sets WHERE name = 'CC-RCC-SLAB-M20'")
                .fetch_one(&pool)
                .await
                .expect("slab row")
                .get::<String, _>("master_rule_set_id");

        seed_catalog(&pool).await.expect("second seed");
        let second_counts = counts(&pool).await;
        let second_slab_id =
            sqlx::query("SELECT master_rule_set_id FROM master_rule_sets WHERE name = 'CC-RCC-SLAB-M20'")
                .fetch_one(&pool)
                .await
                .expect("slab row")
                .get::<String, _>("master_rule_set_id");

        assert_eq!(first_counts, second_counts);
        assert_eq!(first_slab_id, second_slab_id);
        assert_eq!(first_counts.0, 3);
    }

    #[tokio::test]
    async fn seeded_defaults_are_stored_as_exact_text() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        seed_catalog(&pool).await.expect("seed");

        let value = sqlx::query(
            "SELECT mi.default_value FROM master_rule_items mi
             JOIN master_rule_sets ms ON ms.master_rule_set_id = mi.master_rule_set_id
             WHERE ms.name = 'CC-RCC-SLAB-M20' AND mi.key = 'cement_bags_per_m3'",
        )
        .fetch_one(&pool)
        .await
        .expect("cement default")
        .get::<String, _>("default_value");

        assert_eq!(value, "7.4");
    }
}

//! Persistence seam for the pipeline.
//!
//! The engine only ever talks to this trait; the sqlite-backed
//! implementation lives in the db crate. An in-memory store backs the
//! engine tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::attempt::{AttemptId, ValidationAttempt};
use crate::domain::boq::{Boq, BoqId, BoqItem};
use crate::domain::rules::{BoqCategory, MasterRuleItem, MasterRuleSet};
use crate::errors::ApplicationError;
use crate::materializer::MaterializedRuleSet;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database failure: {0}")]
    Database(String),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn insert_attempt(&self, attempt: &ValidationAttempt) -> Result<(), StoreError>;

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<ValidationAttempt>, StoreError>;

    /// Write the derived metrics back onto an attempt. Called at most once
    /// per attempt, from the compute stage.
    async fn set_attempt_metrics(
        &self,
        id: &AttemptId,
        metrics: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    async fn list_categories(&self) -> Result<Vec<BoqCategory>, StoreError>;

    async fn insert_category(&self, category: &BoqCategory) -> Result<(), StoreError>;

    async fn list_master_rule_sets(&self) -> Result<Vec<MasterRuleSet>, StoreError>;

    async fn list_master_rule_items(&self) -> Result<Vec<MasterRuleItem>, StoreError>;

    async fn insert_rule_set(&self, materialized: &MaterializedRuleSet) -> Result<(), StoreError>;

    async fn insert_boq(&self, boq: &Boq, items: &[BoqItem]) -> Result<(), StoreError>;

    async fn set_boq_compute_json(&self, id: &BoqId, blob: &Value) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    attempts: Vec<ValidationAttempt>,
    categories: Vec<BoqCategory>,
    master_rule_sets: Vec<MasterRuleSet>,
    master_rule_items: Vec<MasterRuleItem>,
    rule_sets: Vec<MaterializedRuleSet>,
    boqs: Vec<Boq>,
    boq_items: Vec<BoqItem>,
}

/// Mutex-backed store for tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload the master catalog tables.
    pub fn seed(
        &self,
        categories: Vec<BoqCategory>,
        masters: Vec<MasterRuleSet>,
        items: Vec<MasterRuleItem>,
    ) {
        let mut state = self.lock();
        state.categories = categories;
        state.master_rule_sets = masters;
        state.master_rule_items = items;
    }

    pub fn attempts(&self) -> Vec<ValidationAttempt> {
        self.lock().attempts.clone()
    }

    pub fn rule_sets(&self) -> Vec<MaterializedRuleSet> {
        self.lock().rule_sets.clone()
    }

    pub fn boqs(&self) -> Vec<Boq> {
        self.lock().boqs.clone()
    }

    pub fn boq_items(&self) -> Vec<BoqItem> {
        self.lock().boq_items.clone()
    }

    pub fn categories(&self) -> Vec<BoqCategory> {
        self.lock().categories.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn insert_attempt(&self, attempt: &ValidationAttempt) -> Result<(), StoreError> {
        self.lock().attempts.push(attempt.clone());
        Ok(())
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<ValidationAttempt>, StoreError> {
        Ok(self.lock().attempts.iter().find(|attempt| &attempt.id == id).cloned())
    }

    async fn set_attempt_metrics(
        &self,
        id: &AttemptId,
        metrics: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let Some(attempt) = state.attempts.iter_mut().find(|attempt| &attempt.id == id) else {
            return Err(StoreError::Database(format!("attempt not found: {id}")));
        };
        attempt.derived_metrics = metrics.clone();
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<BoqCategory>, StoreError> {
        Ok(self.lock().categories.clone())
    }

    async fn insert_category(&self, category: &BoqCategory) -> Result<(), StoreError> {
        self.lock().categories.push(category.clone());
        Ok(())
    }

    async fn list_master_rule_sets(&self) -> Result<Vec<MasterRuleSet>, StoreError> {
        Ok(self.lock().master_rule_sets.clone())
    }

    async fn list_master_rule_items(&self) -> Result<Vec<MasterRuleItem>, StoreError> {
        Ok(self.lock().master_rule_items.clone())
    }

    async fn insert_rule_set(&self, materialized: &MaterializedRuleSet) -> Result<(), StoreError> {
        self.lock().rule_sets.push(materialized.clone());
        Ok(())
    }

    async fn insert_boq(&self, boq: &Boq, items: &[BoqItem]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.boqs.push(boq.clone());
        state.boq_items.extend(items.iter().cloned());
        Ok(())
    }

    async fn set_boq_compute_json(&self, id: &BoqId, blob: &Value) -> Result<(), StoreError> {
        let mut state = self.lock();
        let Some(boq) = state.boqs.iter_mut().find(|boq| &boq.id == id) else {
            return Err(StoreError::Database(format!("boq not found: {id}")));
        };
        boq.compute_json = Some(blob.clone());
        Ok(())
    }
}

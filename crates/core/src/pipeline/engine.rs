//! Pipeline engine.
//!
//! Stage order is fixed: validate, select rules, compute, assemble
//! provenance. The conditional edge sits after validation: only a `valid`
//! attempt moves on. Later stages contain their own failures in their
//! result slot and each guards on its predecessor's completion, so the
//! attempt record always survives, whatever happens downstream.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::catalog::{resolve_rule_sets, RuleSelection, SelectionPath};
use crate::compute::{compute_items, MasterDefaults};
use crate::domain::attempt::{AttemptId, ValidationAttempt, ValidationStatus};
use crate::domain::boq::{Boq, BoqId, BoqItem, BoqItemId, BoqStatus};
use crate::domain::rules::{BoqCategory, CategoryId, MasterRuleItem, MasterRuleSet, RuleItem};
use crate::errors::{ApplicationError, DomainError};
use crate::geometry::{normalize, GeometryReport};
use crate::materializer::materialize;
use crate::metrics::{derive_metrics, stringify_metrics};
use crate::pipeline::states::{
    ComputeOutcome, EstimateRequest, PipelineResult, PipelineStage, RulesOutcome, StageResult,
    ValidationOutcome,
};
use crate::pipeline::store::PipelineStore;
use crate::provenance;
use crate::services::{ExtractionService, SelectionService, ServiceError};

pub struct PipelineEngine<X, S, P> {
    extractor: X,
    selector: S,
    store: P,
}

impl<X, S, P> PipelineEngine<X, S, P>
where
    X: ExtractionService,
    S: SelectionService,
    P: PipelineStore,
{
    pub fn new(extractor: X, selector: S, store: P) -> Self {
        Self { extractor, selector, store }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Run one estimation request end to end.
    ///
    /// Every run creates a fresh attempt; a `valid` one additionally gets
    /// fresh rule sets and a fresh BOQ. Only configuration and attempt
    /// persistence failures escape as errors.
    pub async fn run(&self, request: EstimateRequest) -> Result<PipelineResult, ApplicationError> {
        if let Some(parent_id) = &request.parent_attempt_id {
            let parent = self
                .store
                .get_attempt(parent_id)
                .await
                .map_err(ApplicationError::from)?;
            if parent.is_none() {
                return Err(ApplicationError::Domain(DomainError::ParentAttemptNotFound {
                    attempt_id: parent_id.to_string(),
                }));
            }
        }

        let validation = self.validate(&request).await?;
        tracing::info!(
            event_name = "pipeline.validate.completed",
            attempt_id = %validation.attempt.id,
            status = validation.attempt.status.as_str(),
            missing_fields = validation.attempt.missing_fields.len(),
            invalid_fields = validation.attempt.invalid_fields.len(),
        );

        if validation.attempt.status != ValidationStatus::Valid {
            return Ok(PipelineResult {
                validation,
                rules: StageResult::NotRun,
                compute: StageResult::NotRun,
                provenance: StageResult::NotRun,
            });
        }

        let rules = self.select_rules(&request, &validation).await;
        if let Some(reason) = rules.failure_reason() {
            tracing::warn!(
                event_name = "pipeline.select_rules.failed",
                attempt_id = %validation.attempt.id,
                stage = PipelineStage::SelectRules.as_str(),
                reason,
            );
        }

        let compute = match rules.completed() {
            Some(outcome) => self.compute(&request, &validation, outcome).await,
            None => StageResult::NotRun,
        };
        if let Some(reason) = compute.failure_reason() {
            tracing::error!(
                event_name = "pipeline.compute_boq.failed",
                attempt_id = %validation.attempt.id,
                stage = PipelineStage::ComputeBoq.as_str(),
                reason,
            );
        }

        let provenance = match (rules.completed(), compute.completed()) {
            (Some(rules), Some(compute)) => {
                self.assemble_provenance(&validation, rules, compute).await
            }
            _ => StageResult::NotRun,
        };
        if let Some(reason) = provenance.failure_reason() {
            tracing::error!(
                event_name = "pipeline.assemble_provenance.failed",
                attempt_id = %validation.attempt.id,
                stage = PipelineStage::AssembleProvenance.as_str(),
                reason,
            );
        }

        let mut validation = validation;
        let mut compute = compute;
        if let StageResult::Completed(outcome) = &mut compute {
            validation.attempt.derived_metrics = stringify_metrics(&outcome.metrics);
            if let StageResult::Completed(blob) = &provenance {
                outcome.boq.compute_json = Some(blob.clone());
            }
        }

        Ok(PipelineResult { validation, rules, compute, provenance })
    }

    async fn validate(
        &self,
        request: &EstimateRequest,
    ) -> Result<ValidationOutcome, ApplicationError> {
        let (payload, report, status, degraded) =
            match self.extractor.extract(&request.raw_input_text).await {
                Ok(payload) => {
                    let report = normalize(&payload);
                    let status = if report.is_clean() {
                        ValidationStatus::Valid
                    } else {
                        ValidationStatus::Invalid
                    };
                    (Some(payload), report, status, None)
                }
                Err(error @ ServiceError::CredentialsMissing(_)) => {
                    return Err(ApplicationError::Configuration(error.to_string()));
                }
                Err(error) => {
                    // Degraded extraction: record the attempt and ask the
                    // caller for a better description instead of failing.
                    (None, GeometryReport::default(), ValidationStatus::NeedsMoreInfo, Some(error))
                }
            };

        if let Some(error) = &degraded {
            tracing::warn!(
                event_name = "pipeline.validate.extraction_degraded",
                error = %error,
            );
        }

        let attempt = ValidationAttempt {
            id: AttemptId::generate(),
            user_id: request.user_id.clone(),
            project_id: request.project_id.clone(),
            parent_attempt_id: request.parent_attempt_id.clone(),
            status,
            raw_input_text: request.raw_input_text.clone(),
            extracted_payload: payload,
            missing_fields: report.missing_fields.clone(),
            invalid_fields: report.invalid_fields.clone(),
            unit_warnings: report.unit_warnings.clone(),
            derived_metrics: BTreeMap::new(),
            created_at: Utc::now(),
        };
        self.store.insert_attempt(&attempt).await.map_err(ApplicationError::from)?;

        Ok(ValidationOutcome { attempt, report })
    }

    async fn select_rules(
        &self,
        request: &EstimateRequest,
        validation: &ValidationOutcome,
    ) -> StageResult<RulesOutcome> {
        match self.try_select_rules(request, validation).await {
            Ok(result) => result,
            Err(error) => StageResult::Failed { reason: error.to_string() },
        }
    }

    async fn try_select_rules(
        &self,
        request: &EstimateRequest,
        validation: &ValidationOutcome,
    ) -> Result<StageResult<RulesOutcome>, ApplicationError> {
        let categories = self.store.list_categories().await.map_err(ApplicationError::from)?;
        let masters = self.store.list_master_rule_sets().await.map_err(ApplicationError::from)?;

        let selection = resolve_rule_sets(
            &self.selector,
            &categories,
            &masters,
            validation.attempt.extracted_payload.as_ref(),
            &request.raw_input_text,
        )
        .await;

        let (selected, path) = match selection {
            RuleSelection::Selected { masters, path } => (masters, path),
            RuleSelection::MissingFields { missing_fields } => {
                return Ok(StageResult::Failed {
                    reason: format!("missing_fields: {}", missing_fields.join(", ")),
                });
            }
            RuleSelection::InsufficientDetails => {
                return Ok(StageResult::Failed { reason: "insufficient_details".to_string() });
            }
            RuleSelection::NoMasterRulesAvailable => {
                return Ok(StageResult::Failed {
                    reason: "no_master_rules_available".to_string(),
                });
            }
        };

        // A category name the catalog has never seen becomes a dictionary
        // entry so later runs can match it.
        if let SelectionPath::UnknownCategoryFullCatalog { requested } = &path {
            let category = BoqCategory {
                id: CategoryId::generate(),
                name: requested.clone(),
                description: None,
            };
            self.store.insert_category(&category).await.map_err(ApplicationError::from)?;
        }

        let master_items =
            self.store.list_master_rule_items().await.map_err(ApplicationError::from)?;
        let now = Utc::now();
        let mut rule_sets = Vec::with_capacity(selected.len());
        for master in &selected {
            let materialized = materialize(
                &request.user_id,
                request.project_id.as_deref(),
                master,
                &master_items,
                now,
            );
            self.store.insert_rule_set(&materialized).await.map_err(ApplicationError::from)?;
            rule_sets.push(materialized);
        }

        tracing::info!(
            event_name = "pipeline.select_rules.completed",
            attempt_id = %validation.attempt.id,
            rule_sets = rule_sets.len(),
        );

        Ok(StageResult::Completed(RulesOutcome { path, rule_sets }))
    }

    async fn compute(
        &self,
        request: &EstimateRequest,
        validation: &ValidationOutcome,
        rules: &RulesOutcome,
    ) -> StageResult<ComputeOutcome> {
        match self.try_compute(request, validation, rules).await {
            Ok(outcome) => StageResult::Completed(outcome),
            Err(error) => StageResult::Failed { reason: error.to_string() },
        }
    }

    async fn try_compute(
        &self,
        request: &EstimateRequest,
        validation: &ValidationOutcome,
        rules: &RulesOutcome,
    ) -> Result<ComputeOutcome, ApplicationError> {
        let categories = self.store.list_categories().await.map_err(ApplicationError::from)?;
        let masters = self.store.list_master_rule_sets().await.map_err(ApplicationError::from)?;
        let master_items =
            self.store.list_master_rule_items().await.map_err(ApplicationError::from)?;

        // Later sets override earlier ones when they share a key.
        let mut rules_by_key: BTreeMap<String, RuleItem> = BTreeMap::new();
        for set in &rules.rule_sets {
            for item in &set.items {
                rules_by_key.insert(item.key.clone(), item.clone());
            }
        }

        let category_names: BTreeMap<&CategoryId, &str> = categories
            .iter()
            .map(|category| (&category.id, category.name.as_str()))
            .collect();
        let key_category: BTreeMap<String, String> = rules_by_key
            .values()
            .filter_map(|rule| {
                let category_id = rule.category_id.as_ref()?;
                let name = category_names.get(category_id)?;
                Some((rule.key.clone(), name.to_string()))
            })
            .collect();

        let defaults = build_master_defaults(&categories, &masters, &master_items);
        let metrics = derive_metrics(&validation.report, &rules_by_key);

        let metric_strings = stringify_metrics(&metrics);
        self.store
            .set_attempt_metrics(&validation.attempt.id, &metric_strings)
            .await
            .map_err(ApplicationError::from)?;

        let lines = compute_items(&rules_by_key, &key_category, &metrics, &defaults);

        let boq_id = BoqId::generate();
        let items: Vec<BoqItem> = lines
            .into_iter()
            .map(|line| BoqItem {
                id: BoqItemId::generate(),
                boq_id: boq_id.clone(),
                category_id: line.category_id,
                rule_item_id: Some(line.rule_item_id),
                material_name: line.material_name,
                quantity: line.quantity,
                unit: line.unit,
                quantity_basis: line.quantity_basis,
                notes: None,
                calculation_trace: Some(line.calculation_trace),
            })
            .collect();

        let boq = Boq {
            id: boq_id.clone(),
            user_id: request.user_id.clone(),
            project_id: request.project_id.clone(),
            validation_attempt_id: validation.attempt.id.clone(),
            status: BoqStatus::Draft,
            compute_json: None,
            created_at: Utc::now(),
        };
        self.store.insert_boq(&boq, &items).await.map_err(ApplicationError::from)?;

        tracing::info!(
            event_name = "pipeline.compute_boq.completed",
            attempt_id = %validation.attempt.id,
            boq_id = %boq.id,
            items = items.len(),
        );

        Ok(ComputeOutcome { boq, items, metrics })
    }

    async fn assemble_provenance(
        &self,
        validation: &ValidationOutcome,
        rules: &RulesOutcome,
        compute: &ComputeOutcome,
    ) -> StageResult<serde_json::Value> {
        match self.try_assemble_provenance(validation, rules, compute).await {
            Ok(blob) => StageResult::Completed(blob),
            Err(error) => StageResult::Failed { reason: error.to_string() },
        }
    }

    async fn try_assemble_provenance(
        &self,
        validation: &ValidationOutcome,
        rules: &RulesOutcome,
        compute: &ComputeOutcome,
    ) -> Result<serde_json::Value, ApplicationError> {
        let blob = provenance::assemble(rules.path.clone(), &rules.rule_sets).to_json()?;
        self.store
            .set_boq_compute_json(&compute.boq.id, &blob)
            .await
            .map_err(ApplicationError::from)?;

        tracing::info!(
            event_name = "pipeline.assemble_provenance.completed",
            attempt_id = %validation.attempt.id,
            boq_id = %compute.boq.id,
        );

        Ok(blob)
    }
}

fn build_master_defaults(
    categories: &[BoqCategory],
    masters: &[MasterRuleSet],
    master_items: &[MasterRuleItem],
) -> MasterDefaults {
    let mut defaults = MasterDefaults::default();
    for item in master_items {
        let Some(master) = masters.iter().find(|master| master.id == item.master_rule_set_id)
        else {
            continue;
        };
        let Some(category) = categories.iter().find(|category| category.id == master.category_id)
        else {
            continue;
        };
        defaults.insert(&category.name, &item.key, item.unit.clone(), item.default_value);
    }
    defaults
}

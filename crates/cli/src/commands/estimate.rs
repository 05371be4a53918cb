use serde_json::json;

use crate::commands::{current_thread_runtime, load_config, CommandResult};
use takeoff_agent::{LlmExtractor, LlmSelector, OpenRouterClient};
use takeoff_core::domain::attempt::AttemptId;
use takeoff_core::pipeline::{EstimateRequest, PipelineEngine, PipelineResult, StageResult};
use takeoff_core::ApplicationError;
use takeoff_db::{connect, migrations, SqlPipelineStore};

pub fn run(
    user: String,
    project: Option<String>,
    text: String,
    parent_attempt: Option<String>,
) -> CommandResult {
    let config = match load_config("estimate") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let extractor = match OpenRouterClient::from_config(&config.llm) {
        Ok(client) => LlmExtractor::new(client),
        Err(error) => {
            return CommandResult::failure("estimate", "llm_credentials", error.to_string(), 2);
        }
    };
    let selector = match OpenRouterClient::from_config(&config.llm) {
        Ok(client) => LlmSelector::new(client),
        Err(error) => {
            return CommandResult::failure("estimate", "llm_credentials", error.to_string(), 2);
        }
    };

    let runtime = match current_thread_runtime("estimate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let engine =
            PipelineEngine::new(extractor, selector, SqlPipelineStore::new(pool.clone()));
        let request = EstimateRequest {
            user_id: user,
            project_id: project,
            raw_input_text: text,
            parent_attempt_id: parent_attempt.map(AttemptId),
        };

        let outcome = engine.run(request).await.map_err(|error| {
            let (error_class, exit_code) = classify(&error);
            (error_class, error.to_string(), exit_code)
        });

        pool.close().await;
        outcome
    });

    match result {
        Ok(outcome) => CommandResult::success("estimate", render_summary(&outcome)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("estimate", error_class, message, exit_code)
        }
    }
}

fn classify(error: &ApplicationError) -> (&'static str, u8) {
    match error {
        ApplicationError::Domain(_) => ("domain_validation", 2),
        ApplicationError::Configuration(_) => ("configuration", 2),
        ApplicationError::Persistence(_) => ("db_persistence", 4),
        ApplicationError::Integration(_) => ("integration", 5),
    }
}

fn render_summary(outcome: &PipelineResult) -> String {
    let attempt = &outcome.validation.attempt;

    let rules = match &outcome.rules {
        StageResult::Completed(rules) => json!({
            "status": "completed",
            "selection": &rules.path,
            "rule_sets": rules
                .rule_sets
                .iter()
                .map(|set| set.rule_set.name.clone())
                .collect::<Vec<_>>(),
        }),
        StageResult::Failed { reason } => json!({"status": "failed", "reason": reason}),
        StageResult::NotRun => json!({"status": "not_run"}),
    };

    let compute = match &outcome.compute {
        StageResult::Completed(compute) => json!({
            "status": "completed",
            "boq_id": &compute.boq.id.0,
            "items": compute.items.len(),
            "metrics": compute
                .metrics
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect::<std::collections::BTreeMap<_, _>>(),
        }),
        StageResult::Failed { reason } => json!({"status": "failed", "reason": reason}),
        StageResult::NotRun => json!({"status": "not_run"}),
    };

    let provenance = match &outcome.provenance {
        StageResult::Completed(blob) => json!({"status": "completed", "blob": blob}),
        StageResult::Failed { reason } => json!({"status": "failed", "reason": reason}),
        StageResult::NotRun => json!({"status": "not_run"}),
    };

    json!({
        "validation_attempt_id": &attempt.id.0,
        "status": attempt.status.as_str(),
        "missing_fields": &attempt.missing_fields,
        "invalid_fields": &attempt.invalid_fields,
        "unit_warnings": &attempt.unit_warnings,
        "rules": rules,
        "compute": compute,
        "provenance": provenance,
    })
    .to_string()
}

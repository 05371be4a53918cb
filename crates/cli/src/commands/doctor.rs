use serde::Serialize;

use takeoff_core::config::{AppConfig, LoadOptions};
use takeoff_db::connect;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

impl CheckStatus {
    fn marker(self) -> &'static str {
        match self {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn from_outcome(name: &'static str, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(details) => Self { name, status: CheckStatus::Pass, details },
            Err(details) => Self { name, status: CheckStatus::Fail, details },
        }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
    }

    let mut lines = vec![report.summary.clone()];
    for check in &report.checks {
        lines.push(format!("- [{}] {}: {}", check.status.marker(), check.name, check.details));
    }
    lines.join("\n")
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::from_outcome(
                "config_validation",
                Ok("configuration loaded and validated".to_string()),
            ),
            DoctorCheck::from_outcome("llm_credentials", check_llm_credentials(&config)),
            DoctorCheck::from_outcome("database_connectivity", check_database(&config)),
        ],
        Err(error) => vec![
            DoctorCheck::from_outcome("config_validation", Err(error.to_string())),
            DoctorCheck::skipped("llm_credentials"),
            DoctorCheck::skipped("database_connectivity"),
        ],
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    DoctorReport {
        overall_status: if all_pass { CheckStatus::Pass } else { CheckStatus::Fail },
        summary: if all_pass {
            "doctor: all readiness checks passed".to_string()
        } else {
            "doctor: one or more readiness checks failed".to_string()
        },
        checks,
    }
}

// migrate/seed/export work without a key; estimate does not.
fn check_llm_credentials(config: &AppConfig) -> Result<String, String> {
    match &config.llm.api_key {
        Some(_) => Ok(format!("api key configured for model `{}`", config.llm.model)),
        None => Err("llm.api_key is not set; `estimate` will refuse to run".to_string()),
    }
}

fn check_database(config: &AppConfig) -> Result<String, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| format!("failed to initialize async runtime: {error}"))?;

    runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        pool.close().await;
        Ok(format!("connected using `{}`", config.database.url))
    })
}

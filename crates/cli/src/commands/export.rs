use crate::commands::{current_thread_runtime, load_config, CommandFailure, CommandResult};
use takeoff_core::domain::boq::BoqId;
use takeoff_db::{connect, fetch_boq, fetch_export_rows, render_csv};

pub fn run(boq_id: String) -> CommandResult {
    let config = match load_config("export") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("export") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let id = BoqId(boq_id.clone());
        let boq = fetch_boq(&pool, &id)
            .await
            .map_err(|error| ("db_persistence", error.to_string(), 4u8))?;
        if boq.is_none() {
            pool.close().await;
            return Err(("not_found", format!("no BOQ with id `{boq_id}`"), 6u8));
        }

        let rows = fetch_export_rows(&pool, &id)
            .await
            .map_err(|error| ("db_persistence", error.to_string(), 4u8))?;

        pool.close().await;
        Ok::<_, CommandFailure>(render_csv(&rows))
    });

    match result {
        Ok(csv) => CommandResult::raw(csv),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("export", error_class, message, exit_code)
        }
    }
}

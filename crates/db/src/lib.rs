pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{seed_catalog, SeedSummary};
pub use repositories::{
    fetch_boq, fetch_export_rows, render_csv, BoqExportRow, RepositoryError, SqlPipelineStore,
};

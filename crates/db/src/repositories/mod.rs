use thiserror::Error;

use takeoff_core::pipeline::StoreError;

pub mod listings;
pub mod pipeline;

pub use listings::{fetch_boq, fetch_export_rows, render_csv, BoqExportRow};
pub use pipeline::SqlPipelineStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Database(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

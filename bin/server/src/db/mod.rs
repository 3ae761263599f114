//! Postgres persistence for flowforge.
//!
//! [`PgStore`] implements every storage trait the engine and scheduler
//! consume:
//! - [`WorkflowStore`](flowforge_workflow::WorkflowStore) over `workflows`, `nodes` and `connections`
//! - [`ExecutionStore`](flowforge_workflow::ExecutionStore) over `executions` and `node_executions`
//! - [`CredentialStore`](flowforge_workflow::credential::CredentialStore) over `credentials`

mod credential;
mod execution;
mod workflow;

use flowforge_workflow::StoreError;
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;

/// Store backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Parses a text column into a domain value.
fn decode<T>(column: &'static str, value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e| {
        sqlx::Error::Decode(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {column} '{value}': {e}"),
        )))
    })
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

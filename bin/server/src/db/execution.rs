//! Execution and NodeExecution records.
//!
//! Inserts rely on the `correlation_id` and `(execution_id, node_id)`
//! unique constraints so a redelivered run keeps its first row. Status
//! updates lock the row and apply the record's own transition rules before
//! writing it back.

use super::{PgStore, backend, decode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowforge_core::{CorrelationId, ExecutionId};
use flowforge_workflow::execution::{NewExecution, NewNodeExecution};
use flowforge_workflow::store::{ExecutionPage, ExecutionQuery, ExecutionStore};
use flowforge_workflow::{Execution, NodeExecution, NodeId, StoreError};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Postgres, Transaction};

const EXECUTION_COLUMNS: &str = "id, correlation_id, workflow_id, trigger, status, started_at, \
     completed_at, output, error, error_stack";

const NODE_EXECUTION_COLUMNS: &str = "id, execution_id, node_id, node_name, node_type, status, \
     input, output, error, started_at, completed_at";

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    correlation_id: String,
    workflow_id: String,
    trigger: Option<String>,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    output: Option<JsonValue>,
    error: Option<String>,
    error_stack: Option<String>,
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<Execution, sqlx::Error> {
        Ok(Execution {
            id: decode("execution id", &self.id)?,
            correlation_id: decode("correlation id", &self.correlation_id)?,
            workflow_id: decode("workflow id", &self.workflow_id)?,
            trigger: self
                .trigger
                .as_deref()
                .map(|t| decode("trigger", t))
                .transpose()?,
            status: decode("status", &self.status)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            output: self.output,
            error: self.error,
            error_stack: self.error_stack,
        })
    }
}

#[derive(FromRow)]
struct NodeExecutionRow {
    id: String,
    execution_id: String,
    node_id: String,
    node_name: String,
    node_type: String,
    status: String,
    input: JsonValue,
    output: Option<JsonValue>,
    error: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRow {
    fn try_into_record(self) -> Result<NodeExecution, sqlx::Error> {
        Ok(NodeExecution {
            id: decode("node execution id", &self.id)?,
            execution_id: decode("execution id", &self.execution_id)?,
            node_id: NodeId::from(self.node_id),
            node_name: self.node_name,
            node_type: decode("node type", &self.node_type)?,
            status: decode("status", &self.status)?,
            input: self.input,
            output: self.output,
            error: self.error,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

impl PgStore {
    async fn execution_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE correlation_id = $1"
        ))
        .bind(correlation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ExecutionRow::try_into_record).transpose()
    }

    async fn node_execution_by_key(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
    ) -> Result<Option<NodeExecution>, sqlx::Error> {
        let row: Option<NodeExecutionRow> = sqlx::query_as(&format!(
            "SELECT {NODE_EXECUTION_COLUMNS} FROM node_executions \
             WHERE execution_id = $1 AND node_id = $2"
        ))
        .bind(execution_id.to_string())
        .bind(node_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(NodeExecutionRow::try_into_record).transpose()
    }

    /// Locks the run, applies `change` to it and writes it back.
    async fn update_execution<F>(
        &self,
        correlation_id: CorrelationId,
        change: F,
    ) -> Result<Execution, StoreError>
    where
        F: FnOnce(&mut Execution) -> Result<(), StoreError> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE correlation_id = $1 FOR UPDATE"
        ))
        .bind(correlation_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let mut execution = row
            .ok_or_else(|| StoreError::NotFound {
                entity: "execution",
                key: correlation_id.to_string(),
            })?
            .try_into_record()
            .map_err(backend)?;

        change(&mut execution)?;
        write_execution(&mut tx, &execution).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(execution)
    }

    async fn update_node_execution<F>(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        change: F,
    ) -> Result<NodeExecution, StoreError>
    where
        F: FnOnce(&mut NodeExecution) -> Result<(), StoreError> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row: Option<NodeExecutionRow> = sqlx::query_as(&format!(
            "SELECT {NODE_EXECUTION_COLUMNS} FROM node_executions \
             WHERE execution_id = $1 AND node_id = $2 FOR UPDATE"
        ))
        .bind(execution_id.to_string())
        .bind(node_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let mut record = row
            .ok_or_else(|| StoreError::NotFound {
                entity: "node execution",
                key: format!("{execution_id}/{node_id}"),
            })?
            .try_into_record()
            .map_err(backend)?;

        change(&mut record)?;
        sqlx::query(
            r#"
            UPDATE node_executions
            SET status = $2, output = $3, error = $4, completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.status.as_str())
        .bind(&record.output)
        .bind(&record.error)
        .bind(record.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(record)
    }
}

async fn write_execution(
    tx: &mut Transaction<'_, Postgres>,
    execution: &Execution,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $2, completed_at = $3, output = $4, error = $5, error_stack = $6
        WHERE id = $1
        "#,
    )
    .bind(execution.id.to_string())
    .bind(execution.status.as_str())
    .bind(execution.completed_at)
    .bind(&execution.output)
    .bind(&execution.error)
    .bind(&execution.error_stack)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_execution(&self, new: NewExecution) -> Result<Execution, StoreError> {
        let correlation_id = new.correlation_id;
        let execution = Execution::start(new);
        sqlx::query(
            r#"
            INSERT INTO executions (id, correlation_id, workflow_id, trigger, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.correlation_id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.trigger.map(|t| t.as_str()))
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        self.execution_by_correlation(correlation_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::Backend {
                message: format!("execution {correlation_id} vanished after insert"),
            })
    }

    async fn complete_execution(
        &self,
        correlation_id: CorrelationId,
        output: JsonValue,
    ) -> Result<Execution, StoreError> {
        self.update_execution(correlation_id, |execution| execution.complete(output))
            .await
    }

    async fn fail_execution(
        &self,
        correlation_id: CorrelationId,
        error: String,
        error_stack: Option<String>,
    ) -> Result<Execution, StoreError> {
        self.update_execution(correlation_id, |execution| {
            execution.fail(error, error_stack)
        })
        .await
    }

    async fn execution(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Execution>, StoreError> {
        self.execution_by_correlation(correlation_id)
            .await
            .map_err(backend)
    }

    async fn start_node_execution(
        &self,
        new: NewNodeExecution,
    ) -> Result<NodeExecution, StoreError> {
        let record = NodeExecution::start(new);
        sqlx::query(
            r#"
            INSERT INTO node_executions
                (id, execution_id, node_id, node_name, node_type, status, input, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (execution_id, node_id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(record.node_id.as_str())
        .bind(&record.node_name)
        .bind(record.node_type.as_str())
        .bind(record.status.as_str())
        .bind(&record.input)
        .bind(record.started_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        self.node_execution_by_key(record.execution_id, &record.node_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::Backend {
                message: format!(
                    "node execution {}/{} vanished after insert",
                    record.execution_id, record.node_id
                ),
            })
    }

    async fn complete_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        output: JsonValue,
    ) -> Result<NodeExecution, StoreError> {
        self.update_node_execution(execution_id, node_id, |record| record.complete(output))
            .await
    }

    async fn fail_node_execution(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        error: String,
    ) -> Result<NodeExecution, StoreError> {
        self.update_node_execution(execution_id, node_id, |record| record.fail(error))
            .await
    }

    async fn node_executions(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<NodeExecution>, StoreError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
            "SELECT {NODE_EXECUTION_COLUMNS} FROM node_executions \
             WHERE execution_id = $1 ORDER BY started_at, id"
        ))
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(NodeExecutionRow::try_into_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<ExecutionPage, StoreError> {
        let workflow_id = query.workflow_id.map(|id| id.to_string());
        let offset = i64::try_from(query.offset()).map_err(|e| StoreError::Backend {
            message: format!("page offset out of range: {e}"),
        })?;

        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE ($1::TEXT IS NULL OR workflow_id = $1) \
             ORDER BY started_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(&workflow_id)
        .bind(i64::from(query.page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM executions WHERE ($1::TEXT IS NULL OR workflow_id = $1)",
        )
        .bind(&workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let items = rows
            .into_iter()
            .map(ExecutionRow::try_into_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(ExecutionPage::new(
            items,
            query,
            u64::try_from(total_count).unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::{NodeExecutionId, WorkflowId};
    use flowforge_workflow::{ExecutionStatus, NodeType, TriggerKind};
    use serde_json::json;

    fn execution_row(status: &str) -> ExecutionRow {
        ExecutionRow {
            id: ExecutionId::new().to_string(),
            correlation_id: CorrelationId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            trigger: Some("webhook".to_string()),
            status: status.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
            error_stack: None,
        }
    }

    #[test]
    fn execution_rows_decode_status_and_trigger() {
        let record = execution_row("RUNNING").try_into_record().expect("decode");
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.trigger, Some(TriggerKind::Webhook));
    }

    #[test]
    fn lowercase_status_is_rejected() {
        let err = execution_row("running").try_into_record().expect_err("status");
        assert!(err.to_string().contains("invalid status 'running'"));
    }

    #[test]
    fn node_execution_rows_decode() {
        let record = NodeExecutionRow {
            id: NodeExecutionId::new().to_string(),
            execution_id: ExecutionId::new().to_string(),
            node_id: "call".to_string(),
            node_name: "Call API".to_string(),
            node_type: "HTTP_REQUEST".to_string(),
            status: "FAILED".to_string(),
            input: json!({ "x": 1 }),
            output: None,
            error: Some("HTTP 404".to_string()),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
        .try_into_record()
        .expect("decode");
        assert_eq!(record.node_type, NodeType::HttpRequest);
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.node_id, NodeId::from("call"));
    }
}

//! Workflow definitions and the cron trigger scan.

use super::{PgStore, backend, decode};
use async_trait::async_trait;
use flowforge_core::{UserId, WorkflowId};
use flowforge_workflow::store::{CronTriggerNode, WorkflowStore};
use flowforge_workflow::{Connection, Node, NodeId, NodeType, StoreError, Workflow};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    user_id: String,
    name: String,
}

#[derive(FromRow)]
struct NodeRow {
    id: String,
    name: String,
    #[sqlx(rename = "type")]
    node_type: String,
    data: JsonValue,
}

impl NodeRow {
    fn try_into_node(self) -> Result<Node, sqlx::Error> {
        let node_type: NodeType = decode("node type", &self.node_type)?;
        Ok(Node::new(self.id, self.name, node_type).with_data(self.data))
    }
}

#[derive(FromRow)]
struct ConnectionRow {
    from_node_id: String,
    from_output: String,
    to_node_id: String,
}

impl From<ConnectionRow> for Connection {
    fn from(row: ConnectionRow) -> Self {
        Connection::from_port(row.from_node_id, row.from_output, row.to_node_id)
    }
}

#[derive(FromRow)]
struct CronNodeRow {
    workflow_id: String,
    id: String,
    data: JsonValue,
}

impl CronNodeRow {
    fn try_into_trigger(self) -> Result<CronTriggerNode, sqlx::Error> {
        Ok(CronTriggerNode {
            workflow_id: decode("workflow id", &self.workflow_id)?,
            node_id: NodeId::from(self.id),
            data: self.data,
        })
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn load_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> =
            sqlx::query_as("SELECT id, user_id, name FROM workflows WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let nodes: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, name, type, data
            FROM nodes
            WHERE workflow_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let connections: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT from_node_id, from_output, to_node_id
            FROM connections
            WHERE workflow_id = $1
            ORDER BY id
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let user_id: UserId = decode("user id", &row.user_id).map_err(backend)?;
        let nodes = nodes
            .into_iter()
            .map(NodeRow::try_into_node)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        Ok(Some(Workflow {
            id,
            user_id,
            name: row.name,
            nodes,
            connections: connections.into_iter().map(Connection::from).collect(),
        }))
    }

    async fn cron_triggers(&self) -> Result<Vec<CronTriggerNode>, StoreError> {
        let rows: Vec<CronNodeRow> = sqlx::query_as(
            r#"
            SELECT workflow_id, id, data
            FROM nodes
            WHERE type = $1
            ORDER BY workflow_id, position
            "#,
        )
        .bind(NodeType::CronTrigger.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(CronNodeRow::try_into_trigger)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }
}

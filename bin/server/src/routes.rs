//! HTTP trigger and run status surface.
//!
//! Trigger handlers only validate the request, build a [`RunRequest`] and
//! hand it to the dispatcher. Runs execute elsewhere, so every accepted
//! trigger answers `202 Accepted` with the correlation id of the run. That
//! id is then used to read the run back from `/api/executions`.

use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use flowforge_core::{CorrelationId, ParseIdError, WorkflowId};
use flowforge_workflow::dispatch::RunDispatcher;
use flowforge_workflow::store::{ExecutionPage, ExecutionQuery, ExecutionStore, WorkflowStore};
use flowforge_workflow::{
    Execution, NodeExecution, NodeType, RunRequest, StoreError, TriggerKind, Workflow,
};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<dyn WorkflowStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub dispatcher: Arc<dyn RunDispatcher>,
}

/// Body of every accepted trigger.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub success: bool,
    pub message: &'static str,
    pub correlation_id: CorrelationId,
}

/// A run with its node executions in start order.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetail {
    pub execution: Execution,
    pub node_executions: Vec<NodeExecution>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/webhooks/generic", post(generic_webhook))
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{correlation_id}", get(get_execution))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn parse_id<T: FromStr<Err = ParseIdError>>(raw: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|e: ParseIdError| ApiError::InvalidId {
        id: raw.to_string(),
        reason: e.to_string(),
    })
}

fn store_error(e: StoreError) -> ApiError {
    ApiError::Store {
        details: e.to_string(),
    }
}

async fn find_workflow(state: &AppState, id: WorkflowId) -> Result<Workflow, ApiError> {
    state
        .workflows
        .load_workflow(id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::WorkflowNotFound { id: id.to_string() })
}

async fn accept(
    state: &AppState,
    request: RunRequest,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let correlation_id = request.correlation_id.ok_or_else(|| ApiError::Dispatch {
        details: "request built without a correlation id".to_string(),
    })?;
    let workflow_id = request.workflow_id;
    let trigger = request.trigger;
    state
        .dispatcher
        .dispatch(request)
        .await
        .map_err(|e| ApiError::Dispatch {
            details: e.to_string(),
        })?;
    info!(
        %correlation_id,
        workflow_id = ?workflow_id,
        trigger = ?trigger,
        "run accepted"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            success: true,
            message: "Workflow triggered successfully",
            correlation_id,
        }),
    ))
}

/// Manual execution from the editor. The optional JSON body seeds the run.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let workflow_id = parse_id(&id)?;
    find_workflow(&state, workflow_id).await?;
    let initial_data = if body.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody {
            reason: e.to_string(),
        })?
    };
    accept(&state, RunRequest::new(workflow_id, initial_data)).await
}

/// Generic inbound webhook for workflows that contain a `WEBHOOK` node.
async fn generic_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let raw_id = query
        .get("workflowId")
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::MissingParameter { name: "workflowId" })?;
    let workflow_id = parse_id(raw_id)?;
    let workflow = find_workflow(&state, workflow_id).await?;
    if !workflow.has_node_type(NodeType::Webhook) {
        return Err(ApiError::TriggerNotConfigured {
            id: workflow_id.to_string(),
            node_type: NodeType::Webhook.as_str(),
        });
    }

    let initial_data = json!({
        "webhook": {
            "body": webhook_body(&body),
            "headers": header_map(&headers),
            "query": query,
        }
    });
    accept(
        &state,
        RunRequest::new(workflow_id, initial_data).with_trigger(TriggerKind::Webhook),
    )
    .await
}

/// One run by correlation id, with its node executions.
async fn get_execution(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    let correlation_id: CorrelationId = parse_id(&correlation_id)?;
    let execution = state
        .executions
        .execution(correlation_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::ExecutionNotFound {
            id: correlation_id.to_string(),
        })?;
    let node_executions = state
        .executions
        .node_executions(execution.id)
        .await
        .map_err(store_error)?;
    Ok(Json(ExecutionDetail {
        execution,
        node_executions,
    }))
}

/// Paged run history, optionally for one workflow.
async fn list_executions(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ExecutionPage>, ApiError> {
    let workflow_id = params
        .get("workflowId")
        .filter(|id| !id.is_empty())
        .map(|id| parse_id(id))
        .transpose()?;
    let query = ExecutionQuery {
        workflow_id,
        page: page_param(&params, "page", ExecutionQuery::DEFAULT_PAGE, u32::MAX)?,
        page_size: page_param(
            &params,
            "pageSize",
            ExecutionQuery::DEFAULT_PAGE_SIZE,
            ExecutionQuery::MAX_PAGE_SIZE,
        )?,
    };
    let page = state
        .executions
        .list_executions(&query)
        .await
        .map_err(store_error)?;
    Ok(Json(page))
}

fn page_param(
    params: &HashMap<String, String>,
    name: &'static str,
    default: u32,
    max: u32,
) -> Result<u32, ApiError> {
    let Some(raw) = params.get(name) else {
        return Ok(default);
    };
    let value: u32 = raw.parse().map_err(|e: std::num::ParseIntError| {
        ApiError::InvalidParameter {
            name,
            reason: e.to_string(),
        }
    })?;
    if value == 0 || value > max {
        return Err(ApiError::InvalidParameter {
            name,
            reason: format!("must be between 1 and {max}"),
        });
    }
    Ok(value)
}

/// A body that is not JSON is recorded as an empty object.
fn webhook_body(body: &[u8]) -> JsonValue {
    serde_json::from_slice(body).unwrap_or_else(|_| JsonValue::Object(Map::new()))
}

fn header_map(headers: &HeaderMap) -> JsonValue {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), JsonValue::String(value.to_string()));
        }
    }
    JsonValue::Object(map)
}

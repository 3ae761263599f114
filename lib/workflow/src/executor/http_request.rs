use super::{ExecutorInput, NodeExecutor, required, with_status};
use crate::context::RunContext;
use crate::credential::{Cipher, CredentialStore};
use crate::error::ExecutionError;
use crate::node::{Node, NodeId};
use crate::step::StepRunner;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use flowforge_core::{CredentialId, UserId};
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default bound on one outbound request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A request with every template resolved and the credential decrypted.
struct PreparedRequest {
    method: Method,
    url: Url,
    body: Option<JsonValue>,
    bearer: Option<String>,
}

/// Calls an HTTP endpoint and stores the response under `variableName`.
pub struct HttpRequestExecutor {
    client: Client,
    templates: Arc<TemplateEngine>,
    credentials: Arc<dyn CredentialStore>,
    cipher: Arc<dyn Cipher>,
}

impl HttpRequestExecutor {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        templates: Arc<TemplateEngine>,
        credentials: Arc<dyn CredentialStore>,
        cipher: Arc<dyn Cipher>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            templates,
            credentials,
            cipher,
        })
    }

    async fn run(
        &self,
        node: &Node,
        context: RunContext,
        user_id: UserId,
        steps: &dyn StepRunner,
    ) -> Result<RunContext, ExecutionError> {
        let variable = required(node, "variableName")?;
        let prepared = self.prepare(node, &context, user_id).await?;

        let prepared = &prepared;
        let node_id = &node.id;
        let step = move || async move { self.send(node_id, prepared).await }.boxed();
        let response = steps
            .run_step(&format!("{node_id}:http-request"), &step)
            .await?;

        Ok(context.with_variable(variable, json!({ "httpResponse": response })))
    }

    async fn prepare(
        &self,
        node: &Node,
        context: &RunContext,
        user_id: UserId,
    ) -> Result<PreparedRequest, ExecutionError> {
        let invalid = |reason: String| ExecutionError::InvalidConfig {
            node_id: node.id.clone(),
            reason,
        };

        let endpoint = self
            .templates
            .render(&node.id, required(node, "endpoint")?, context)?;
        let url = Url::parse(endpoint.trim())
            .map_err(|e| invalid(format!("endpoint '{endpoint}' is not a valid URL: {e}")))?;

        let method = match node.data_str("method").map(str::to_ascii_uppercase).as_deref() {
            None | Some("GET") => Method::GET,
            Some("POST") => Method::POST,
            Some("PUT") => Method::PUT,
            Some("PATCH") => Method::PATCH,
            Some("DELETE") => Method::DELETE,
            Some(other) => return Err(invalid(format!("unsupported method '{other}'"))),
        };

        let sends_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        let body = match node.data_str("body") {
            Some(template) if sends_body => {
                let rendered = self.templates.render(&node.id, template, context)?;
                let parsed = serde_json::from_str(&rendered)
                    .map_err(|e| invalid(format!("body is not valid JSON: {e}")))?;
                Some(parsed)
            }
            _ => None,
        };

        let bearer = self.bearer(node, user_id).await?;

        Ok(PreparedRequest {
            method,
            url,
            body,
            bearer,
        })
    }

    async fn bearer(&self, node: &Node, user_id: UserId) -> Result<Option<String>, ExecutionError> {
        let Some(raw) = node.data_str("credentialId") else {
            return Ok(None);
        };
        let not_found = || ExecutionError::CredentialNotFound {
            node_id: node.id.clone(),
            credential_id: raw.to_string(),
        };
        let id: CredentialId = raw.parse().map_err(|_| not_found())?;
        let stored = self
            .credentials
            .credential(user_id, id)
            .await?
            .ok_or_else(not_found)?;
        let secret = self
            .cipher
            .decrypt(&stored.value)
            .map_err(|e| ExecutionError::InvalidConfig {
                node_id: node.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(secret))
    }

    async fn send(
        &self,
        node_id: &NodeId,
        prepared: &PreparedRequest,
    ) -> Result<JsonValue, ExecutionError> {
        let transient = |reason: String| ExecutionError::Transient {
            node_id: node_id.clone(),
            reason,
        };

        let mut request = self
            .client
            .request(prepared.method.clone(), prepared.url.clone());
        if let Some(token) = &prepared.bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &prepared.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| transient(e.to_string()))?;
        let status = response.status();
        debug!(node_id = %node_id, method = %prepared.method, status = status.as_u16(), "http response");

        if status.is_server_error() {
            return Err(transient(format!("server responded {status}")));
        }
        if status.is_client_error() {
            return Err(ExecutionError::Provider {
                node_id: node_id.clone(),
                reason: format!("server responded {status}"),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let text = response.text().await.map_err(|e| transient(e.to_string()))?;
        let data = if is_json {
            match serde_json::from_str::<JsonValue>(&text) {
                Ok(value) => value,
                Err(_) => JsonValue::String(text),
            }
        } else {
            JsonValue::String(text)
        };

        Ok(json!({
            "status": status.as_u16(),
            "statusText": status.canonical_reason().unwrap_or_default(),
            "data": data,
        }))
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    fn channel(&self) -> &'static str {
        "http-request-execution"
    }

    async fn execute(&self, input: ExecutorInput<'_>) -> Result<RunContext, ExecutionError> {
        let ExecutorInput {
            node,
            context,
            meta,
            steps,
            status,
        } = input;
        with_status(
            status,
            self.channel(),
            &node.id,
            self.run(node, context, meta.user_id, steps),
        )
        .await
    }
}

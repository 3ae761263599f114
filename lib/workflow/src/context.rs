//! The run context threaded through every executor.
//!
//! Variables accumulate node outputs. The branch decision of a condition node
//! travels separately in `control`, so persisted snapshots never contain it.

use crate::connection::{FALSE_PORT, TRUE_PORT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Key that holds non-object initial data.
pub const INPUT_KEY: &str = "input";

/// Outcome of a branching node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchResult(pub bool);

impl BranchResult {
    /// The output port this decision selects.
    #[must_use]
    pub fn port(&self) -> &'static str {
        if self.0 { TRUE_PORT } else { FALSE_PORT }
    }
}

/// Variables plus an optional out-of-band branch signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    variables: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    control: Option<BranchResult>,
}

impl RunContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a context from run-request data.
    ///
    /// Objects become the variable map, `null` yields an empty context, and
    /// any other value is kept under [`INPUT_KEY`].
    #[must_use]
    pub fn from_initial(data: JsonValue) -> Self {
        let variables = match data {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert(INPUT_KEY.to_string(), other);
                map
            }
        };
        Self {
            variables,
            control: None,
        }
    }

    #[must_use]
    pub fn variables(&self) -> &Map<String, JsonValue> {
        &self.variables
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.variables.get(key)
    }

    /// Returns the context with `key` set to `value`.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Returns the context carrying a branch decision.
    #[must_use]
    pub fn with_control(mut self, result: BranchResult) -> Self {
        self.control = Some(result);
        self
    }

    /// Removes and returns the branch decision, if any.
    pub fn take_control(&mut self) -> Option<BranchResult> {
        self.control.take()
    }

    /// The variables as a JSON object, for persistence and templating.
    #[must_use]
    pub fn snapshot(&self) -> JsonValue {
        JsonValue::Object(self.variables.clone())
    }
}

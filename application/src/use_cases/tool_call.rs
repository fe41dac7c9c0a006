//! Structured tool calls over the browser bridge
//!
//! Maps the HTTP tool endpoint's `tools/list` / `tools/call` methods onto
//! structured bridge commands sent through the caller's [`UserHub`].

use crate::hub::HubRegistry;
use eye_domain::{BridgeCommand, RoutingKey};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

/// One tool the endpoint advertises.
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    bridge_method: &'static str,
    /// `(argument, json type, description)` in bridge argument order.
    params: &'static [(&'static str, &'static str, &'static str)],
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "algo_eval",
        description: "Execute JavaScript code in the browser and return the result",
        bridge_method: "eval",
        params: &[("code", "string", "JavaScript code to execute")],
    },
    ToolSpec {
        name: "algo_getState",
        description: "Get the current ALGO OS state including windows, apps, and user info",
        bridge_method: "getState",
        params: &[],
    },
    ToolSpec {
        name: "algo_query",
        description: "Query a DOM element using CSS selector",
        bridge_method: "query",
        params: &[("selector", "string", "CSS selector")],
    },
    ToolSpec {
        name: "algo_queryAll",
        description: "Query all matching DOM elements using CSS selector",
        bridge_method: "queryAll",
        params: &[("selector", "string", "CSS selector")],
    },
    ToolSpec {
        name: "algo_click",
        description: "Click a DOM element by CSS selector",
        bridge_method: "click",
        params: &[("selector", "string", "CSS selector of element to click")],
    },
    ToolSpec {
        name: "algo_setValue",
        description: "Set the value of an input element",
        bridge_method: "setValue",
        params: &[
            ("selector", "string", "CSS selector of input element"),
            ("value", "string", "Value to set"),
        ],
    },
    ToolSpec {
        name: "algo_openApp",
        description: "Open an application by ID",
        bridge_method: "openApp",
        params: &[("appId", "string", "Application ID to open")],
    },
    ToolSpec {
        name: "algo_closeWindow",
        description: "Close a window by ID",
        bridge_method: "closeWindow",
        params: &[("windowId", "integer", "Window ID to close")],
    },
];

impl ToolSpec {
    fn schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|(name, ty, description)| {
                (
                    name.to_string(),
                    json!({ "type": ty, "description": description }),
                )
            })
            .collect();
        let mut schema = json!({ "type": "object", "properties": properties });
        if !self.params.is_empty() {
            let required: Vec<&str> = self.params.iter().map(|(name, _, _)| *name).collect();
            schema["required"] = json!(required);
        }
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": schema,
        })
    }

    /// Missing arguments are passed through as `null`.
    fn command(&self, arguments: &Map<String, Value>) -> BridgeCommand {
        let args = self
            .params
            .iter()
            .map(|(name, _, _)| arguments.get(*name).cloned().unwrap_or(Value::Null))
            .collect();
        BridgeCommand::new(self.bridge_method, args)
    }
}

/// `tools/list` result body.
pub fn tool_catalog() -> Value {
    json!({ "tools": TOOLS.iter().map(ToolSpec::schema).collect::<Vec<_>>() })
}

/// Map a tool name and its arguments to a bridge command.
pub fn bridge_command(tool: &str, arguments: &Map<String, Value>) -> Option<BridgeCommand> {
    TOOLS
        .iter()
        .find(|spec| spec.name == tool)
        .map(|spec| spec.command(arguments))
}

/// Body of a tool endpoint request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Target another user's bridge instead of the token's own.
    ///
    /// Not permission-checked: any valid token may address any user's
    /// bridge. Deployments that share a relay between tenants must not
    /// hand out tokens to untrusted callers.
    #[serde(default)]
    pub user: Option<String>,
}

/// Use case behind the HTTP tool endpoint.
pub struct ToolCallUseCase {
    hubs: Arc<HubRegistry>,
}

impl ToolCallUseCase {
    pub fn new(hubs: Arc<HubRegistry>) -> Self {
        Self { hubs }
    }

    /// Handle one request on behalf of `caller`. Failures are reported as
    /// `{"error": ...}` bodies, never as transport errors.
    pub async fn execute(&self, caller: &RoutingKey, request: ToolRequest) -> Value {
        let target = match request.user.as_deref() {
            Some(user) if !user.is_empty() => RoutingKey::from(user),
            _ => caller.clone(),
        };

        match request.method.as_str() {
            "tools/list" => tool_catalog(),
            "tools/call" => self.call(&target, &request.params).await,
            other => error_body(format!("Unknown method: {other}")),
        }
    }

    async fn call(&self, target: &RoutingKey, params: &Map<String, Value>) -> Value {
        let tool = params.get("name").and_then(Value::as_str).unwrap_or("");
        let empty = Map::new();
        let arguments = params
            .get("arguments")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let Some(hub) = self.hubs.get(target).filter(|hub| hub.has_primary()) else {
            return error_body(format!(
                "No browser session for user {target}. Open the Claude app in the browser first."
            ));
        };
        let Some(command) = bridge_command(tool, arguments) else {
            return error_body(format!("Unknown tool: {tool}"));
        };

        debug!("Tool call {} for {}", tool, target);
        match hub.send_structured(command.into_map()).await {
            Ok(text) => json!({ "content": [{ "type": "text", "text": text }] }),
            Err(e) => error_body(e.to_string()),
        }
    }
}

fn error_body(message: String) -> Value {
    json!({ "error": message })
}

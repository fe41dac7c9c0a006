use super::McpError;
use super::protocol::{
    EYE_TOOL, EyeArguments, INVALID_PARAMS, IncomingJsonRpcRequest, JsonRpcResponseOut,
    METHOD_NOT_FOUND, ToolCallParams, ToolCallResult, initialize_result, tools_list_result,
};
use eye_application::use_cases::direct::DirectClient;
use eye_domain::util::preview;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

pub struct McpServer {
    client: Arc<DirectClient>,
}

impl McpServer {
    pub fn new(client: Arc<DirectClient>) -> Self {
        Self { client }
    }

    /// Serve requests until `reader` hits EOF.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<(), McpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP: serving on stdio");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
        info!("MCP: stdin closed");
        Ok(())
    }

    /// Answer one line. Blank lines, unparseable lines and notifications
    /// produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponseOut> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let request: IncomingJsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                debug!("MCP: skipping unparseable line ({}): {}", e, preview(line));
                return None;
            }
        };
        if request.is_notification() {
            debug!("MCP: notification {}", request.method);
            return None;
        }
        Some(self.handle(request).await)
    }

    pub async fn handle(&self, request: IncomingJsonRpcRequest) -> JsonRpcResponseOut {
        let id = request.id;
        match request.method.as_str() {
            "initialize" => JsonRpcResponseOut::result(id, initialize_result()),
            "tools/list" => JsonRpcResponseOut::result(id, tools_list_result()),
            "tools/call" => self.call_tool(id, request.params.unwrap_or(Value::Null)).await,
            other => {
                debug!("MCP: unknown method {}", other);
                JsonRpcResponseOut::error(id, METHOD_NOT_FOUND, "Method not found")
            }
        }
    }

    async fn call_tool(&self, id: Value, params: Value) -> JsonRpcResponseOut {
        let Ok(params) = serde_json::from_value::<ToolCallParams>(params) else {
            return JsonRpcResponseOut::error(id, INVALID_PARAMS, "Invalid params");
        };
        if params.name != EYE_TOOL {
            return JsonRpcResponseOut::error(id, METHOD_NOT_FOUND, "Unknown tool");
        }
        let Ok(args) = serde_json::from_value::<EyeArguments>(params.arguments) else {
            return JsonRpcResponseOut::error(id, INVALID_PARAMS, "Invalid arguments");
        };

        let result = match self.client.evaluate(&args.expr).await {
            Ok(delivery) if delivery.is_success() => ToolCallResult::success(delivery.payload),
            Ok(delivery) => ToolCallResult::error(delivery.payload),
            Err(e) => ToolCallResult::error(e.to_string()),
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponseOut::result(id, value),
            Err(e) => JsonRpcResponseOut::error(id, INVALID_PARAMS, e.to_string()),
        }
    }
}

//! Line-delimited JSON-RPC server.
//!
//! One frame per line in, one response per line out. Frames are handled
//! strictly in order; a slow tool call blocks the next frame.

use jules_core::SessionSource;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::protocol::{
    CallToolParams, CallToolResult, INVALID_PARAMS, INVALID_REQUEST, InitializeResult, PARSE_ERROR,
    RpcError, RpcRequest, RpcResponse,
};
use crate::tools::ToolRegistry;

/// Tool server over a pair of byte streams.
pub struct Server<S>
where
    S: SessionSource,
{
    registry: ToolRegistry<S>,
    name: String,
    version: String,
}

impl<S> Server<S>
where
    S: SessionSource,
{
    #[must_use]
    pub fn new(registry: ToolRegistry<S>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            version: version.into(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry<S> {
        &self.registry
    }

    /// Serve until the reader hits end of input.
    ///
    /// # Errors
    /// Returns error if reading or writing fails.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read frame: {e}");
                    return Err(e);
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let json = match serde_json::to_string(&response) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize response: {e}");
                    continue;
                }
            };

            if let Err(e) = write_frame(&mut writer, &json).await {
                error!("Failed to write response: {e}");
                return Err(e);
            }
        }
        debug!("Input closed");
        Ok(())
    }

    /// Handle one raw frame. Notifications produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Unparsable frame: {e}");
                return Some(RpcResponse::failure(
                    Value::Null,
                    RpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                ));
            }
        };

        let id = value.get("id").cloned();
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("Invalid request: {e}");
                return Some(RpcResponse::failure(
                    id.unwrap_or(Value::Null),
                    RpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
                ));
            }
        };

        self.handle(request).await
    }

    /// Handle one decoded request.
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification");
            return None;
        };

        let result = match request.method.as_str() {
            "initialize" => serde_json::to_value(InitializeResult::new(&self.name, &self.version))
                .map_err(|e| RpcError::new(INVALID_REQUEST, e.to_string())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list() })),
            "tools/call" => self.call_tool(request.params).await,
            method => {
                warn!(method, "Unknown method");
                Err(RpcError::method_not_found(method))
            }
        };

        Some(match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => RpcResponse::failure(id, e),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| RpcError::new(INVALID_PARAMS, format!("Invalid params: {e}")))?;

        let arguments = params.arguments.unwrap_or(Value::Null);
        let result = match self.registry.call(&params.name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %params.name, error = %e, "Tool call failed");
                CallToolResult::error(e.to_string())
            }
        };
        serde_json::to_value(result).map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
    }
}

async fn write_frame<W>(writer: &mut W, json: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

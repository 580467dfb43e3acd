//! Tool server for Jules sessions.
//!
//! Provides:
//! - Wire protocol (JSON-RPC 2.0, newline delimited)
//! - Tool registry mapping tool calls onto `SessionManager`
//! - Result formatting (review reports, activity views, next-step hints)
//! - Sequential stdio server loop

pub mod format;
pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{CallToolResult, RpcError, RpcRequest, RpcResponse, ToolDescriptor};
pub use server::Server;
pub use tools::{DispatchError, ToolRegistry};

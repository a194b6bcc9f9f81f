//! Tools bundled with the message processor
//!
//! - `get_current_time`: server clock
//! - `echo`: returns its input
//! - `announce`: broadcasts a log notification to every open SSE stream

pub mod announce;
pub mod echo;
pub mod get_current_time;

use std::sync::Arc;

use crate::server::McpServer;
use crate::transport::HttpTransport;

pub use announce::AnnounceTool;
pub use echo::EchoTool;
pub use get_current_time::GetCurrentTimeTool;

/// Register every bundled tool with the processor
pub fn register_builtin_tools(server: &mut McpServer, transport: HttpTransport) {
    server.register_tool(Arc::new(GetCurrentTimeTool::new()));
    server.register_tool(Arc::new(EchoTool::new()));
    server.register_tool(Arc::new(AnnounceTool::new(transport)));
}

//! Agent protocol seam
//!
//! Wire frames, the tool and resource handler traits, and the per-connection
//! router. The transport that carries the frames is an external
//! collaborator; everything here is what it plugs into.

pub mod protocol;
pub mod server;

pub use protocol::{
    ContentBlock, ResourceDescriptor, RpcRequest, RpcResponse, ToolDescriptor, ToolInvocation,
    ToolOutput,
};
pub use server::{McpRouter, ResourceProvider, ToolHandler};

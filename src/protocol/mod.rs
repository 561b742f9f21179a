//! JSON-RPC 2.0 over a Unix socket, one message per line.

mod messages;
mod rpc;

pub use messages::{RemotesResult, Request, Response, RpcError, StatusResult};
pub use rpc::{RpcErrorResponse, RpcRequest, RpcResponse, read_request, read_response, write_message};

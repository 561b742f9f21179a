//! JSON-RPC 2.0 envelopes, one JSON object per line.

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::{Request, Response, RpcError};

const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Response,
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: Value,
}

/// Either kind of reply; an object without `result` falls through to the error shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Success(RpcResponse),
    Failure(RpcErrorResponse),
}

impl RpcRequest {
    pub fn new(request: Request, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            request,
            id: id.into(),
        }
    }
}

impl RpcResponse {
    pub fn new(result: Response, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }
}

impl RpcErrorResponse {
    pub fn new(error: RpcError, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error,
            id,
        }
    }
}

fn invalid_data(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Next line from `reader`, or None at EOF.
fn next_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    match reader.read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

/// Serialize `msg` onto one line and flush.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let json = serde_json::to_string(msg).map_err(invalid_data)?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

/// Read one request. Ok(None) means the client hung up.
pub fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<RpcRequest>> {
    let Some(line) = next_line(reader)? else {
        return Ok(None);
    };
    let request: RpcRequest = serde_json::from_str(&line).map_err(invalid_data)?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(invalid_data(format!(
            "unsupported jsonrpc version {:?}",
            request.jsonrpc
        )));
    }
    Ok(Some(request))
}

/// Read one reply, split into the success and error envelopes.
pub fn read_response<R: BufRead>(
    reader: &mut R,
) -> io::Result<Result<RpcResponse, RpcErrorResponse>> {
    let line = next_line(reader)?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "daemon closed the connection")
    })?;
    match serde_json::from_str::<Reply>(&line) {
        Ok(Reply::Success(response)) => Ok(Ok(response)),
        Ok(Reply::Failure(error)) => Ok(Err(error)),
        Err(_) => Err(invalid_data("invalid JSON-RPC response")),
    }
}

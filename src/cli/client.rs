use std::io::{BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use thiserror::Error;

use crate::daemon::socket_path;
use crate::protocol::{
    RemotesResult, Request, Response, RpcError, RpcRequest, StatusResult, read_response,
    write_message,
};
use crate::task::CycleReport;

/// Client for communicating with the daemon
pub struct Client {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
    next_id: u64,
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not connect to daemon
    #[error("daemon is not running")]
    NotRunning,
    #[error("IO error: {0}")]
    Io(std::io::Error),
    /// Error returned by the daemon
    #[error("RPC error: {} (code {})", .0.message, .0.code)]
    Rpc(RpcError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn is_not_running_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    ) || matches!(
        err.raw_os_error(),
        Some(libc::ECONNREFUSED)
            | Some(libc::ENOENT)
            | Some(libc::ECONNABORTED)
            | Some(libc::ECONNRESET)
            | Some(libc::EPIPE)
            | Some(libc::ENOTCONN)
    )
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        if is_not_running_io_error(&e) {
            ClientError::NotRunning
        } else {
            ClientError::Io(e)
        }
    }
}

impl Client {
    /// Connect to the daemon
    pub fn connect() -> Result<Self, ClientError> {
        Self::connect_to(&socket_path())
    }

    pub fn connect_to(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)?;

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Send a request and wait for response
    pub fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let rpc_request = RpcRequest::new(request, id);
        write_message(&mut self.writer, &rpc_request)?;
        self.writer.flush()?;

        match read_response(&mut self.reader)? {
            Ok(response) => Ok(response.result),
            Err(error) => Err(ClientError::Rpc(error.error)),
        }
    }

    pub fn status(&mut self) -> Result<StatusResult, ClientError> {
        match self.call(Request::Status)? {
            Response::Status(s) => Ok(s),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Run a cycle in the daemon, bypassing the tick counter.
    pub fn sync(&mut self) -> Result<CycleReport, ClientError> {
        match self.call(Request::Sync)? {
            Response::Sync(report) => Ok(report),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    pub fn remotes(&mut self) -> Result<RemotesResult, ClientError> {
        match self.call(Request::Remotes)? {
            Response::Remotes(r) => Ok(r),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    pub fn stop(&mut self) -> Result<(), ClientError> {
        match self.call(Request::Stop)? {
            Response::Ok(()) => Ok(()),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn maps_broken_pipe_to_not_running() {
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(ClientError::from(err), ClientError::NotRunning));
    }

    #[test]
    fn keeps_unrelated_io_errors_as_io() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(ClientError::from(err), ClientError::Io(_)));
    }

    #[test]
    fn missing_socket_is_not_running() {
        let dir = tempdir().unwrap();
        let result = Client::connect_to(&dir.path().join("absent.sock"));
        assert!(matches!(result, Err(ClientError::NotRunning)));
    }

    #[test]
    fn rpc_error_message_includes_code() {
        let err = ClientError::Rpc(RpcError::not_found("global repository not found"));
        assert_eq!(
            err.to_string(),
            "RPC error: global repository not found (code -1)"
        );
    }
}

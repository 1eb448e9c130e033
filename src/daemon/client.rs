//! Socket client for the daemon RPC protocol.

use crate::daemon::protocol::{read_frame, write_frame, Request, Response, StatusInfo, MAGIC};
use crate::error::{BeadsError, Result};
use serde_json::Value;
use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

/// A connection to a workspace daemon. Requests on one client are
/// answered in order.
pub struct Client {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: u64,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("next_id", &self.next_id).finish()
    }
}

impl Client {
    /// Connect with a per-operation read/write timeout.
    ///
    /// # Errors
    ///
    /// Returns `DaemonUnavailable` when the socket cannot be dialed.
    pub fn connect(socket_path: &Path, timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).map_err(|e| {
            BeadsError::DaemonUnavailable {
                reason: format!("{}: {e}", socket_path.display()),
            }
        })?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
            next_id: 0,
        })
    }

    /// Send one request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns transport errors, or the error the daemon answered with.
    pub fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let request = Request {
            id: self.next_id,
            method: method.to_string(),
            params,
        };

        write_frame(&mut self.writer, &request)?;

        let response: Response =
            read_frame(&mut self.reader)?.ok_or_else(|| BeadsError::DaemonUnavailable {
                reason: "daemon closed the connection".to_string(),
            })?;

        if response.id != request.id {
            return Err(BeadsError::DaemonUnavailable {
                reason: format!(
                    "response id {} does not match request id {}",
                    response.id, request.id
                ),
            });
        }
        response.into_result()
    }

    /// Discovery handshake; verifies the peer really is a beads daemon.
    ///
    /// # Errors
    ///
    /// Returns `DaemonUnavailable` when the peer answers with anything
    /// but the expected magic identifier.
    pub fn handshake(&mut self) -> Result<()> {
        let value = self.request("discover", Value::Null)?;
        let magic = value.get("magic").and_then(Value::as_str).unwrap_or("");
        if magic == MAGIC {
            Ok(())
        } else {
            Err(BeadsError::DaemonUnavailable {
                reason: format!("unexpected handshake: {magic}"),
            })
        }
    }

    /// Fetch daemon status.
    ///
    /// # Errors
    ///
    /// Returns transport or decode errors.
    pub fn status(&mut self) -> Result<StatusInfo> {
        let value = self.request("status", Value::Null)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the daemon to drain and exit.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub fn shutdown(&mut self) -> Result<()> {
        self.request("shutdown", Value::Null)?;
        Ok(())
    }
}

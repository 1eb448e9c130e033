//! Wire protocol for the daemon socket.
//!
//! Frames are newline-delimited JSON over a Unix-domain socket: a
//! request `{id, method, params}` is answered by `{id, result}` or
//! `{id, error: {code, message}}`. Serialized messages never contain a
//! raw newline, so LF is the frame boundary. The server answers a
//! connection's requests in order.

use crate::error::{BeadsError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};

/// Identifier returned by the discovery handshake.
pub const MAGIC: &str = "beads-daemon-1";

/// One RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Error half of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// One RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    #[must_use]
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn from_error(id: u64, err: &BeadsError) -> Self {
        Self {
            id,
            result: None,
            error: Some(WireError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Unwrap into the result value, converting a wire error back into a
    /// `BeadsError`.
    ///
    /// # Errors
    ///
    /// Returns the rebuilt error carried by the response.
    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(BeadsError::from_wire(&err.code, &err.message));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Payload of the `status` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub pid: u32,
    pub version: String,
    pub uptime_seconds: f64,
    pub workspace_path: String,
    pub database_path: String,
    pub last_activity_time: String,
    pub exclusive_lock_active: bool,
    #[serde(default)]
    pub exclusive_lock_holder: String,
}

/// Write one frame.
///
/// # Errors
///
/// Returns an error on serialization or socket failure.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame; `Ok(None)` on clean EOF.
///
/// # Errors
///
/// Returns an error on socket failure or malformed JSON.
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(
    reader: &mut BufReader<R>,
) -> Result<Option<T>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

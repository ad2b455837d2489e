//! Management line protocol.
//!
//! ```text
//! server → client   { "service": "<name> <version> MGMT Server" }\n
//! client → server   <command>\n
//! client → server   <json document>\n        (setptree only)
//! server → client   <json response> | "Invalid command\n" | nothing
//! ```

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Literal reply to an unknown command.
pub const INVALID_COMMAND: &str = "Invalid command\n";

/// A command line sent by a management client. Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Config,
    Values,
    State,
    SetPtree,
    GetPtree,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line {
            "config" => Command::Config,
            "values" => Command::Values,
            "state" => Command::State,
            "setptree" => Command::SetPtree,
            "getptree" => Command::GetPtree,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Config => "config",
            Command::Values => "values",
            Command::State => "state",
            Command::SetPtree => "setptree",
            Command::GetPtree => "getptree",
            Command::Unknown(_) => "invalid",
        }
    }
}

/// Welcome line sent as soon as a client connects.
pub fn banner(service_name: &str, service_version: &str) -> String {
    let banner = serde_json::json!({
        "service": format!("{} {} MGMT Server", service_name, service_version),
    });
    format!("{}\n", banner)
}

#[derive(Debug, Error)]
pub enum LineError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("line exceeds {0} bytes")]
    TooLong(usize),

    #[error("line is not valid UTF-8")]
    NotUtf8,
}

/// Read one `\n`-terminated line of at most `limit` bytes, not counting the
/// `\n` itself.
///
/// Returns `None` on EOF before any byte. A final line without terminator is
/// accepted. The terminator (and a preceding `\r`) is stripped.
pub async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Option<String>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if read > limit {
        return Err(LineError::TooLong(limit));
    }

    String::from_utf8(buf).map(Some).map_err(|_| LineError::NotUtf8)
}

//! One management session: banner, one command, one response, close.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::control::{ChannelError, ConfigChannel, ConfigDocument, DocumentError};
use crate::net::connection::ConnectionId;
use crate::net::protocol::{self, Command, LineError, INVALID_COMMAND};
use crate::observability::metrics;
use crate::stats::StatRegistry;

/// Failure of a single session. Never affects the accept loop.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Line(#[from] LineError),

    #[error("rejected configuration document: {0}")]
    Document(#[from] DocumentError),

    #[error("failed to render response: {0}")]
    Render(#[from] serde_json::Error),

    #[error("timed out waiting for {0}")]
    TimedOut(&'static str),

    #[error("client disconnected while waiting for the configuration document")]
    Disconnected,

    #[error(transparent)]
    Withdrawn(#[from] ChannelError),
}

impl SessionError {
    /// Label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Io(_) => "io",
            SessionError::Line(_) => "protocol",
            SessionError::Document(_) => "document",
            SessionError::Render(_) => "render",
            SessionError::TimedOut(_) => "timeout",
            SessionError::Disconnected => "disconnected",
            SessionError::Withdrawn(_) => "withdrawn",
        }
    }

    /// Whether the failure was caused by the client rather than the server.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            SessionError::TimedOut(_) | SessionError::Disconnected | SessionError::Line(_)
        )
    }
}

pub(crate) struct Session<'a> {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub config: &'a ServerConfig,
    pub registry: &'a StatRegistry,
    pub channel: &'a ConfigChannel,
}

impl Session<'_> {
    pub async fn run(&self, stream: TcpStream) -> Result<(), SessionError> {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        tracing::info!(connection_id = %self.id, peer = %self.peer, "MGMT: Accepted");

        let banner = protocol::banner(&self.config.service_name, &self.config.service_version);
        writer.write_all(banner.as_bytes()).await?;

        // EOF before a command reads as an empty command line.
        let line = self
            .read_line(&mut reader, "command")
            .await?
            .unwrap_or_default();

        let command = Command::parse(&line);
        metrics::record_command(command.as_str());
        tracing::debug!(connection_id = %self.id, command = command.as_str(), "MGMT command");

        match command {
            Command::Config => self.reply_json(&mut writer, &self.registry.render_config()).await?,
            Command::Values => self.reply_json(&mut writer, &self.registry.render_values()).await?,
            Command::State => self.reply_json(&mut writer, &self.registry.render_state()).await?,
            Command::SetPtree => self.set_ptree(&mut reader).await?,
            Command::GetPtree => self.get_ptree(&mut reader, &mut writer).await?,
            Command::Unknown(other) => {
                tracing::warn!(connection_id = %self.id, command = %other, "Invalid MGMT command");
                writer.write_all(INVALID_COMMAND.as_bytes()).await?;
            }
        }

        writer.shutdown().await?;
        Ok(())
    }

    async fn read_line<R>(&self, reader: &mut R, what: &'static str) -> Result<Option<String>, SessionError>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = within(
            self.config.read_timeout(),
            what,
            protocol::read_line(reader, self.config.max_line_bytes),
        )
        .await??;
        Ok(line)
    }

    /// Render fully before writing, so a failure never leaves partial JSON.
    async fn reply_json<W, T>(&self, writer: &mut W, body: &T) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let mut text = serde_json::to_string(body)?;
        text.push('\n');
        writer.write_all(text.as_bytes()).await?;
        Ok(())
    }

    async fn set_ptree<R>(&self, reader: &mut R) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
    {
        let text = self.read_line(reader, "configuration document").await?;
        match text.as_deref().map(str::trim) {
            None | Some("") => {
                tracing::warn!(connection_id = %self.id, "MGMT: No JSON data received");
            }
            Some(text) => {
                let document = ConfigDocument::parse(text)?;
                self.channel.set_document(document);
                tracing::info!(connection_id = %self.id, "MGMT: Configuration document received");
            }
        }
        Ok(())
    }

    /// Wait for the control thread to publish, then send the document.
    ///
    /// Gives up when reading from the client fails or the configured wait
    /// elapses; nothing is written in that case.
    async fn get_ptree<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let pending = self.channel.request_latest();
        let fulfilled = within(
            self.config.getptree_timeout(),
            "configuration document",
            pending.wait(),
        );

        let document = tokio::select! {
            result = fulfilled => result??,
            _ = wait_for_disconnect(reader) => return Err(SessionError::Disconnected),
        };

        writer.write_all(document.to_wire().as_bytes()).await?;
        Ok(())
    }
}

async fn within<F: Future>(
    limit: Option<Duration>,
    what: &'static str,
    future: F,
) -> Result<F::Output, SessionError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| SessionError::TimedOut(what)),
        None => Ok(future.await),
    }
}

/// Resolve once reading from the peer fails. Extra input is discarded.
///
/// EOF only means the peer is done sending; a half-closed client still reads
/// the reply, so EOF never resolves.
async fn wait_for_disconnect<R>(reader: &mut R)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match reader.fill_buf().await {
            Ok([]) => return std::future::pending().await,
            Ok(buf) => {
                let available = buf.len();
                reader.consume(available);
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Reader whose peer reset the connection.
    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn read_failure_is_disconnect() {
        let mut reader = BufReader::new(ResetReader);
        wait_for_disconnect(&mut reader).await;
    }

    #[tokio::test]
    async fn half_close_is_not_disconnect() {
        let mut reader = BufReader::new(&b"noise\nmore noise"[..]);
        let waited =
            tokio::time::timeout(Duration::from_millis(50), wait_for_disconnect(&mut reader)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn within_times_out() {
        let result = within(
            Some(Duration::from_millis(10)),
            "nothing",
            std::future::pending::<()>(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::TimedOut("nothing"))));
    }

    #[tokio::test]
    async fn within_unbounded() {
        assert_eq!(within(None, "value", async { 7 }).await.unwrap(), 7);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(SessionError::Disconnected.kind(), "disconnected");
        assert!(SessionError::TimedOut("x").is_client_side());
        assert!(!SessionError::Withdrawn(ChannelError::Withdrawn).is_client_side());
    }
}

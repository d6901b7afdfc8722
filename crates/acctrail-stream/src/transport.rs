//! The transport seam between [`StreamConnection`] and the network.
//!
//! [`StreamConnection`] only ever talks to a [`FeedTransport`], so tests can
//! drive it with an in-process fake. [`TcpTransport`] is the production
//! implementation: newline-delimited JSON over a plain TCP stream.
//!
//! [`StreamConnection`]: crate::StreamConnection

use std::{future::Future, time::Duration};

use futures_util::{SinkExt, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::{
  Error, Result,
  wire::{ClientMessage, ServerMessage},
};

/// Upper bound on a single framed message; large account payloads fit.
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// One established session with the feed.
pub trait FeedSession: Send {
  fn send(&mut self, msg: ClientMessage) -> impl Future<Output = Result<()>> + Send + '_;

  /// Next message from the feed. `None` means the feed ended the stream.
  ///
  /// Must be cancel-safe: it is polled inside `select!` next to timers.
  fn recv(&mut self) -> impl Future<Output = Option<Result<ServerMessage>>> + Send + '_;

  fn close(&mut self) -> impl Future<Output = Result<()>> + Send + '_;
}

/// Opens sessions. Called once per connection attempt.
pub trait FeedTransport: Send + Sync {
  type Session: FeedSession;

  fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send + '_;
}

// ─── TCP ─────────────────────────────────────────────────────────────────────

/// Newline-delimited JSON over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
  endpoint:        String,
  token:           Option<String>,
  connect_timeout: Duration,
}

impl TcpTransport {
  pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
    Self {
      endpoint: endpoint.into(),
      token,
      connect_timeout: Duration::from_secs(10),
    }
  }

  pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
    self.connect_timeout = timeout;
    self
  }
}

impl FeedTransport for TcpTransport {
  type Session = TcpSession;

  async fn connect(&self) -> Result<TcpSession> {
    let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.endpoint.as_str()))
      .await
      .map_err(|_| Error::ConnectTimeout(self.connect_timeout))??;
    stream.set_nodelay(true)?;
    debug!(endpoint = %self.endpoint, "tcp session established");

    let mut session = TcpSession {
      framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
    };
    if let Some(token) = &self.token {
      session.send(ClientMessage::Auth { token: token.clone() }).await?;
    }
    Ok(session)
  }
}

#[derive(Debug)]
pub struct TcpSession {
  framed: Framed<TcpStream, LinesCodec>,
}

impl FeedSession for TcpSession {
  async fn send(&mut self, msg: ClientMessage) -> Result<()> {
    let line = serde_json::to_string(&msg)?;
    self.framed.send(line).await?;
    Ok(())
  }

  async fn recv(&mut self) -> Option<Result<ServerMessage>> {
    loop {
      let line = match self.framed.next().await? {
        Ok(line) => line,
        Err(e) => return Some(Err(e.into())),
      };
      if line.trim().is_empty() {
        continue;
      }
      return Some(serde_json::from_str(&line).map_err(Error::from));
    }
  }

  async fn close(&mut self) -> Result<()> {
    SinkExt::<String>::close(&mut self.framed).await?;
    Ok(())
  }
}

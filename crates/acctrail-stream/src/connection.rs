//! The subscription session state machine.
//!
//! ```text
//! Disconnected → Connecting → Connected ─(error / end)─┐
//!                    ↑                                  ↓
//!                    └──────── Reconnecting(attempt, delay)
//!                                                       ↓ (budget exhausted)
//!                                                     GaveUp
//! ```
//!
//! The connection owns the [`SubscriptionSet`]. On every reconnect the full
//! set is re-sent, so resubscription depends only on what was active before
//! the drop.

use std::{collections::BTreeMap, time::Duration};

use acctrail_core::update::AccountUpdate;
use backoff::{ExponentialBackoff, backoff::Backoff};
use tokio::{
  sync::{mpsc, watch},
  time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
  Error, ReconnectPolicy, Result,
  decode::decode_account,
  transport::{FeedSession, FeedTransport},
  wire::{AccountFilter, ClientMessage, ServerMessage},
};

// ─── State ───────────────────────────────────────────────────────────────────

/// Observable lifecycle of a [`StreamConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Connected,
  /// Waiting `delay` before reconnect attempt number `attempt` (1-based).
  Reconnecting { attempt: u32, delay: Duration },
  /// Terminal. Recovery needs a process restart.
  GaveUp,
}

/// Tunables for a [`StreamConnection`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
  /// Idle time after which a ping is sent.
  pub keepalive: Duration,
  pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self { keepalive: Duration::from_secs(30), reconnect: ReconnectPolicy::default() }
  }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// The programs the connection should be subscribed to, each with the opaque
/// key used for it on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
  entries: BTreeMap<String, String>,
}

impl SubscriptionSet {
  /// Returns `false` if `program_id` was already present.
  pub fn insert(&mut self, program_id: &str) -> bool {
    if self.entries.contains_key(program_id) {
      return false;
    }
    self.entries.insert(program_id.to_owned(), format!("program_{program_id}"));
    true
  }

  pub fn remove(&mut self, program_id: &str) -> bool { self.entries.remove(program_id).is_some() }

  pub fn contains(&self, program_id: &str) -> bool { self.entries.contains_key(program_id) }

  pub fn key(&self, program_id: &str) -> Option<&str> {
    self.entries.get(program_id).map(String::as_str)
  }

  pub fn programs(&self) -> impl Iterator<Item = &str> { self.entries.keys().map(String::as_str) }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn clear(&mut self) { self.entries.clear() }

  /// One request describing the whole set.
  pub fn request(&self) -> ClientMessage {
    let accounts = self
      .entries
      .iter()
      .map(|(program, key)| (key.clone(), AccountFilter { owner: vec![program.clone()] }))
      .collect();
    ClientMessage::Subscribe { accounts }
  }
}

// ─── Connection ──────────────────────────────────────────────────────────────

/// One logical, self-healing subscription to the feed.
///
/// Decoded updates are pushed into the `mpsc` sender given at construction.
/// Drive the connection with [`run`](Self::run) after the initial
/// [`connect`](Self::connect) and subscription calls.
pub struct StreamConnection<T: FeedTransport> {
  transport:     T,
  session:       Option<T::Session>,
  subscriptions: SubscriptionSet,
  options:       ConnectionOptions,
  state:         watch::Sender<ConnectionState>,
  updates:       mpsc::Sender<AccountUpdate>,
  /// Consecutive failed reconnects; reset after a full reconnect.
  attempt:       u32,
  backoff:       ExponentialBackoff,
  next_ping_id:  u32,
  last_activity: Instant,
}

impl<T: FeedTransport> StreamConnection<T> {
  pub fn new(transport: T, options: ConnectionOptions, updates: mpsc::Sender<AccountUpdate>) -> Self {
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    Self {
      transport,
      session: None,
      subscriptions: SubscriptionSet::default(),
      options,
      state,
      updates,
      attempt: 0,
      backoff: options.reconnect.schedule(),
      next_ping_id: 0,
      last_activity: Instant::now(),
    }
  }

  /// Watch every state transition.
  pub fn state(&self) -> watch::Receiver<ConnectionState> { self.state.subscribe() }

  pub fn current_state(&self) -> ConnectionState { *self.state.borrow() }

  pub fn subscriptions(&self) -> &SubscriptionSet { &self.subscriptions }

  pub fn is_connected(&self) -> bool { self.session.is_some() }

  fn set_state(&self, state: ConnectionState) { self.state.send_replace(state); }

  // ── Session lifecycle ─────────────────────────────────────────────────

  /// Open a session and re-issue every remembered subscription. On first
  /// connect the set is normally empty and nothing is sent.
  pub async fn connect(&mut self) -> Result<()> {
    self.set_state(ConnectionState::Connecting);

    let session = match self.transport.connect().await {
      Ok(session) => session,
      Err(e) => {
        self.set_state(ConnectionState::Disconnected);
        return Err(e);
      }
    };
    self.session = Some(session);
    self.last_activity = Instant::now();

    if !self.subscriptions.is_empty() {
      if let Err(e) = self.send_subscriptions().await {
        self.drop_session().await;
        self.set_state(ConnectionState::Disconnected);
        return Err(e);
      }
    }

    self.set_state(ConnectionState::Connected);
    info!(subscriptions = self.subscriptions.len(), "connected to feed");
    Ok(())
  }

  /// Graceful, terminal close: drops the session and forgets every
  /// subscription. Not used for error recovery.
  pub async fn disconnect(&mut self) {
    self.drop_session().await;
    self.subscriptions.clear();
    self.set_state(ConnectionState::Disconnected);
    info!("disconnected from feed");
  }

  async fn drop_session(&mut self) {
    if let Some(mut session) = self.session.take() {
      if let Err(e) = session.close().await {
        debug!(error = %e, "error closing feed session");
      }
    }
  }

  // ── Subscriptions ─────────────────────────────────────────────────────

  /// Remember `program_id`. Sends nothing; follow with
  /// [`send_subscriptions`](Self::send_subscriptions). Returns `false` if it
  /// was already subscribed.
  pub fn subscribe_to_program(&mut self, program_id: &str) -> bool {
    let added = self.subscriptions.insert(program_id);
    if added {
      debug!(program_id, "subscription added");
    }
    added
  }

  /// Send the entire subscription set as one request. Leaves the set
  /// untouched on failure.
  pub async fn send_subscriptions(&mut self) -> Result<()> {
    let request = self.subscriptions.request();
    let session = self.session.as_mut().ok_or(Error::NotConnected)?;
    session.send(request).await?;
    self.last_activity = Instant::now();
    debug!(subscriptions = self.subscriptions.len(), "subscription set sent");
    Ok(())
  }

  /// Forget `program_id` and, when connected, send the reduced set. Returns
  /// `false` if it was not subscribed.
  pub async fn unsubscribe_from_program(&mut self, program_id: &str) -> Result<bool> {
    if !self.subscriptions.remove(program_id) {
      return Ok(false);
    }
    debug!(program_id, "subscription removed");
    if self.session.is_some() {
      self.send_subscriptions().await?;
    }
    Ok(true)
  }

  // ── Event loop ────────────────────────────────────────────────────────

  /// Pump the feed until `cancel` fires or the reconnect budget runs out.
  ///
  /// Returns `Ok` on cancellation (the session, if any, stays open so the
  /// caller can drain before [`disconnect`](Self::disconnect)) and
  /// [`Error::GaveUp`] when recovery is exhausted. If no session is open
  /// yet, recovery starts immediately.
  pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
    loop {
      if cancel.is_cancelled() {
        return Ok(());
      }

      let Some(mut session) = self.session.take() else {
        self.handle_disconnect(cancel).await?;
        continue;
      };

      let outcome = self.run_connected(&mut session, cancel).await;
      self.session = Some(session);

      match outcome {
        Ok(()) => return Ok(()),
        Err(e) => {
          warn!(error = %e, "feed session lost");
          self.drop_session().await;
          self.handle_disconnect(cancel).await?;
        }
      }
    }
  }

  /// Read from an open session, keeping it alive with pings.
  ///
  /// `Ok` means stop (cancelled, or nobody is consuming updates); `Err` means
  /// the session is gone and should be recovered.
  async fn run_connected(
    &mut self,
    session: &mut T::Session,
    cancel: &CancellationToken,
  ) -> Result<()> {
    loop {
      let idle_deadline = self.last_activity + self.options.keepalive;
      tokio::select! {
        _ = cancel.cancelled() => {
          debug!("stream loop cancelled");
          return Ok(());
        }
        msg = session.recv() => {
          self.last_activity = Instant::now();
          let Some(msg) = msg else {
            return Err(Error::StreamEnded);
          };
          if !self.handle_message(msg?, cancel).await? {
            return Ok(());
          }
        }
        _ = tokio::time::sleep_until(idle_deadline) => {
          let id = self.next_ping_id;
          self.next_ping_id = self.next_ping_id.wrapping_add(1);
          session.send(ClientMessage::Ping { id }).await?;
          self.last_activity = Instant::now();
          trace!(id, "keepalive ping sent");
        }
      }
    }
  }

  /// Returns `Ok(false)` once updates can no longer be delivered.
  async fn handle_message(&mut self, msg: ServerMessage, cancel: &CancellationToken) -> Result<bool> {
    match msg {
      ServerMessage::Account { slot, account, .. } => {
        let update = match decode_account(slot, account) {
          Ok(update) => update,
          Err(e) => {
            warn!(slot, error = %e, "dropping undecodable account update");
            return Ok(true);
          }
        };
        tokio::select! {
          sent = self.updates.send(update) => {
            if sent.is_err() {
              info!("update receiver closed, stopping stream loop");
              return Ok(false);
            }
          }
          _ = cancel.cancelled() => return Ok(false),
        }
        Ok(true)
      }
      ServerMessage::Pong { id } => {
        trace!(id, "pong");
        Ok(true)
      }
      ServerMessage::Error { message } => Err(Error::Server(message)),
    }
  }

  // ── Recovery ──────────────────────────────────────────────────────────

  /// The single recovery path for stream errors, stream end and failed
  /// initial connects. Ignored while a recovery is already in progress.
  async fn handle_disconnect(&mut self, cancel: &CancellationToken) -> Result<()> {
    if matches!(
      self.current_state(),
      ConnectionState::Reconnecting { .. } | ConnectionState::GaveUp
    ) {
      return Ok(());
    }
    self.reconnect(cancel).await
  }

  /// Retry [`connect`](Self::connect) with capped exponential backoff until
  /// it succeeds, `cancel` fires, or the attempt budget is spent.
  async fn reconnect(&mut self, cancel: &CancellationToken) -> Result<()> {
    let policy = self.options.reconnect;

    loop {
      if !policy.allows(self.attempt) {
        self.set_state(ConnectionState::GaveUp);
        error!(attempts = self.attempt, "reconnect budget exhausted, giving up on feed");
        return Err(Error::GaveUp { attempts: self.attempt });
      }

      let delay = self.backoff.next_backoff().unwrap_or(policy.max_delay);
      self.attempt += 1;
      self.set_state(ConnectionState::Reconnecting { attempt: self.attempt, delay });
      info!(attempt = self.attempt, ?delay, "scheduling reconnect");

      tokio::select! {
        _ = cancel.cancelled() => {
          self.set_state(ConnectionState::Disconnected);
          return Ok(());
        }
        _ = tokio::time::sleep(delay) => {}
      }

      let connected = tokio::select! {
        res = self.connect() => res,
        _ = cancel.cancelled() => {
          self.set_state(ConnectionState::Disconnected);
          return Ok(());
        }
      };

      match connected {
        Ok(()) => {
          info!(after_attempts = self.attempt, "reconnected to feed");
          self.attempt = 0;
          self.backoff.reset();
          return Ok(());
        }
        Err(e) => warn!(attempt = self.attempt, error = %e, "reconnect failed"),
      }
    }
  }
}

//! `StreamConnection` behaviour against an in-process fake feed.

use std::{
  collections::{BTreeMap, VecDeque},
  io,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
  ConnectionOptions, ConnectionState, Error, ReconnectPolicy, Result, StreamConnection,
  transport::{FeedSession, FeedTransport},
  wire::{AccountFilter, ClientMessage, RawAccount, ServerMessage},
};

// ─── Fake feed ───────────────────────────────────────────────────────────────

enum Plan {
  Accept(FakeSession),
  Refuse,
}

#[derive(Clone, Default)]
struct FakeFeed {
  planned:  Arc<Mutex<VecDeque<Plan>>>,
  connects: Arc<Mutex<usize>>,
}

impl FakeFeed {
  /// Queue a session for the next connect and return the feed's end of it.
  fn accept(&self) -> Remote {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let fail_sends = Arc::new(AtomicBool::new(false));
    self.planned.lock().unwrap().push_back(Plan::Accept(FakeSession {
      inbound:    inbound_rx,
      sent:       sent.clone(),
      closed:     closed.clone(),
      fail_sends: fail_sends.clone(),
    }));
    Remote { inbound: inbound_tx, sent, closed, fail_sends }
  }

  fn refuse(&self) { self.planned.lock().unwrap().push_back(Plan::Refuse); }

  fn connects(&self) -> usize { *self.connects.lock().unwrap() }
}

impl FeedTransport for FakeFeed {
  type Session = FakeSession;

  async fn connect(&self) -> Result<FakeSession> {
    *self.connects.lock().unwrap() += 1;
    let plan = self.planned.lock().unwrap().pop_front();
    match plan {
      Some(Plan::Accept(session)) => Ok(session),
      Some(Plan::Refuse) | None => {
        Err(Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")))
      }
    }
  }
}

struct FakeSession {
  inbound:    mpsc::UnboundedReceiver<Result<ServerMessage>>,
  sent:       Arc<Mutex<Vec<ClientMessage>>>,
  closed:     Arc<AtomicBool>,
  fail_sends: Arc<AtomicBool>,
}

impl FeedSession for FakeSession {
  async fn send(&mut self, msg: ClientMessage) -> Result<()> {
    if self.fail_sends.load(Ordering::SeqCst) {
      return Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")));
    }
    self.sent.lock().unwrap().push(msg);
    Ok(())
  }

  async fn recv(&mut self) -> Option<Result<ServerMessage>> { self.inbound.recv().await }

  async fn close(&mut self) -> Result<()> {
    self.closed.store(true, Ordering::SeqCst);
    Ok(())
  }
}

/// The feed's side of one session. Dropping it ends the stream.
struct Remote {
  inbound:    mpsc::UnboundedSender<Result<ServerMessage>>,
  sent:       Arc<Mutex<Vec<ClientMessage>>>,
  closed:     Arc<AtomicBool>,
  fail_sends: Arc<AtomicBool>,
}

impl Remote {
  fn push(&self, msg: ServerMessage) { self.inbound.send(Ok(msg)).unwrap(); }

  fn sent(&self) -> Vec<ClientMessage> { self.sent.lock().unwrap().clone() }

  fn subscribe_requests(&self) -> Vec<BTreeMap<String, AccountFilter>> {
    self
      .sent()
      .into_iter()
      .filter_map(|msg| match msg {
        ClientMessage::Subscribe { accounts } => Some(accounts),
        _ => None,
      })
      .collect()
  }

  fn pings(&self) -> usize {
    self.sent().iter().filter(|m| matches!(m, ClientMessage::Ping { .. })).count()
  }

  fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn filters(programs: &[&str]) -> BTreeMap<String, AccountFilter> {
  programs
    .iter()
    .map(|p| (format!("program_{p}"), AccountFilter { owner: vec![p.to_string()] }))
    .collect()
}

fn account(pubkey: Vec<u8>, lamports: u64) -> ServerMessage {
  ServerMessage::Account {
    slot:    99,
    account: RawAccount {
      pubkey,
      owner: vec![0; 32],
      lamports,
      data: vec![1, 2, 3, 4, 5, 6, 7, 8, 9],
      executable: false,
      rent_epoch: 18,
    },
    filters: vec!["program_11111111111111111111111111111111".into()],
  }
}

fn connection(
  feed: &FakeFeed,
  reconnect: ReconnectPolicy,
) -> (StreamConnection<FakeFeed>, mpsc::Receiver<acctrail_core::update::AccountUpdate>) {
  let (tx, rx) = mpsc::channel(16);
  let options = ConnectionOptions { keepalive: Duration::from_secs(30), reconnect };
  (StreamConnection::new(feed.clone(), options, tx), rx)
}

/// Paused-clock timers land on millisecond ticks; allow for that rounding.
fn assert_elapsed(start: Instant, secs: u64) {
  let elapsed = start.elapsed();
  let expected = Duration::from_secs(secs);
  assert!(
    elapsed >= expected && elapsed < expected + Duration::from_millis(50),
    "expected ~{expected:?}, got {elapsed:?}"
  );
}

type RunHandle = tokio::task::JoinHandle<(StreamConnection<FakeFeed>, Result<()>)>;

fn spawn_run(mut conn: StreamConnection<FakeFeed>, cancel: &CancellationToken) -> RunHandle {
  let cancel = cancel.clone();
  tokio::spawn(async move {
    let res = conn.run(&cancel).await;
    (conn, res)
  })
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_is_local_and_idempotent() {
  let feed = FakeFeed::default();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());

  assert!(conn.subscribe_to_program("P1"));
  assert!(!conn.subscribe_to_program("P1"));
  assert_eq!(conn.subscriptions().len(), 1);
  assert_eq!(feed.connects(), 0);

  assert!(matches!(conn.send_subscriptions().await, Err(Error::NotConnected)));
  assert!(conn.subscriptions().contains("P1"));
}

#[tokio::test]
async fn full_set_is_sent_on_every_change() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());

  conn.connect().await.unwrap();
  assert_eq!(conn.current_state(), ConnectionState::Connected);
  assert!(remote.sent().is_empty());

  conn.subscribe_to_program("P1");
  conn.subscribe_to_program("P2");
  conn.send_subscriptions().await.unwrap();
  assert!(conn.unsubscribe_from_program("P1").await.unwrap());
  assert!(!conn.unsubscribe_from_program("nope").await.unwrap());
  assert!(conn.unsubscribe_from_program("P2").await.unwrap());

  assert_eq!(
    remote.subscribe_requests(),
    vec![filters(&["P1", "P2"]), filters(&["P2"]), filters(&[])]
  );
}

#[tokio::test]
async fn failed_send_keeps_subscription_set() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();
  conn.subscribe_to_program("P1");

  remote.fail_sends.store(true, Ordering::SeqCst);
  assert!(conn.send_subscriptions().await.is_err());
  assert!(conn.subscriptions().contains("P1"));
}

#[tokio::test]
async fn disconnect_closes_session_and_forgets_subscriptions() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();
  conn.subscribe_to_program("P1");

  conn.disconnect().await;

  assert!(remote.is_closed());
  assert!(conn.subscriptions().is_empty());
  assert!(!conn.is_connected());
  assert_eq!(conn.current_state(), ConnectionState::Disconnected);
}

// ─── Inbound updates ─────────────────────────────────────────────────────────

#[tokio::test]
async fn updates_are_decoded_and_malformed_ones_dropped() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, mut rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();

  let cancel = CancellationToken::new();
  let handle = spawn_run(conn, &cancel);

  remote.push(account(vec![1; 31], 5));
  remote.push(ServerMessage::Pong { id: 0 });
  remote.push(account(vec![0xff; 32], 5));

  let update = rx.recv().await.unwrap();
  assert_eq!(update.pubkey, "JEKNVnkbo3jma5nREBBJCDoXFVeKkD56V3xKrvRmWxFG");
  assert_eq!(update.owner, "11111111111111111111111111111111");
  assert_eq!(update.slot, 99);
  assert_eq!(update.lamports, 5);
  assert_eq!(update.rent_epoch, 18);

  cancel.cancel();
  let (conn, res) = handle.await.unwrap();
  res.unwrap();
  assert!(conn.is_connected(), "session stays open until disconnect");
  assert!(!remote.is_closed());
}

#[tokio::test]
async fn update_with_unstorable_slot_is_dropped() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, mut rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();

  let cancel = CancellationToken::new();
  let handle = spawn_run(conn, &cancel);

  let mut oversized = account(vec![3; 32], 1);
  if let ServerMessage::Account { slot, .. } = &mut oversized {
    *slot = i64::MAX as u64 + 1;
  }
  remote.push(oversized);
  remote.push(account(vec![4; 32], 2));

  let update = rx.recv().await.unwrap();
  assert_eq!(update.lamports, 2);
  assert_eq!(update.slot, 99);

  cancel.cancel();
  let (conn, res) = handle.await.unwrap();
  res.unwrap();
  assert!(conn.is_connected(), "a bad update does not cost the session");
  assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn closed_receiver_stops_the_loop() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();
  drop(rx);

  remote.push(account(vec![2; 32], 1));
  conn.run(&CancellationToken::new()).await.unwrap();
}

// ─── Keepalive ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ping_is_sent_only_after_idle_interval() {
  let feed = FakeFeed::default();
  let remote = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();

  let cancel = CancellationToken::new();
  let handle = spawn_run(conn, &cancel);

  tokio::time::sleep(Duration::from_secs(20)).await;
  remote.push(ServerMessage::Pong { id: 7 });

  tokio::time::sleep(Duration::from_secs(11)).await;
  assert_eq!(remote.pings(), 0, "traffic at t=20s postpones the ping");

  tokio::time::sleep(Duration::from_secs(20)).await;
  assert_eq!(remote.pings(), 1);

  cancel.cancel();
  handle.await.unwrap().1.unwrap();
}

// ─── Recovery ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stream_end_reconnects_and_resubscribes() {
  let feed = FakeFeed::default();
  let first = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();
  conn.subscribe_to_program("P1");
  conn.subscribe_to_program("P2");
  conn.send_subscriptions().await.unwrap();

  let mut state = conn.state();
  let cancel = CancellationToken::new();
  let second = feed.accept();
  let handle = spawn_run(conn, &cancel);

  let start = Instant::now();
  drop(first);

  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 1, .. }))
    .await
    .unwrap();
  state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

  assert_elapsed(start, 1);
  assert_eq!(feed.connects(), 2);
  assert_eq!(second.subscribe_requests(), vec![filters(&["P1", "P2"])]);

  cancel.cancel();
  handle.await.unwrap().1.unwrap();
}

#[tokio::test(start_paused = true)]
async fn feed_error_message_takes_the_same_recovery_path() {
  let feed = FakeFeed::default();
  let first = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();
  conn.subscribe_to_program("P1");

  let mut state = conn.state();
  let cancel = CancellationToken::new();
  let second = feed.accept();
  let handle = spawn_run(conn, &cancel);

  first.push(ServerMessage::Error { message: "overloaded".into() });

  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
    .await
    .unwrap();
  assert!(first.is_closed());
  state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
  assert_eq!(second.subscribe_requests(), vec![filters(&["P1"])]);

  cancel.cancel();
  handle.await.unwrap().1.unwrap();
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_attempt_budget() {
  let feed = FakeFeed::default();
  let policy = ReconnectPolicy { max_attempts: 3, ..Default::default() };
  let (mut conn, _rx) = connection(&feed, policy);

  let start = Instant::now();
  let res = conn.run(&CancellationToken::new()).await;

  assert!(matches!(res, Err(Error::GaveUp { attempts: 3 })));
  assert_eq!(conn.current_state(), ConnectionState::GaveUp);
  assert_eq!(feed.connects(), 3);
  // 1s + 2s + 4s of backoff.
  assert_elapsed(start, 7);
}

#[tokio::test(start_paused = true)]
async fn attempt_counter_resets_after_successful_reconnect() {
  let feed = FakeFeed::default();
  let first = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();

  feed.refuse();
  let second = feed.accept();
  let _third = feed.accept();

  let mut state = conn.state();
  let cancel = CancellationToken::new();
  let handle = spawn_run(conn, &cancel);

  let start = Instant::now();
  drop(first);
  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 2, .. }))
    .await
    .unwrap();
  state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
  assert_elapsed(start, 3);

  let start = Instant::now();
  drop(second);
  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
    .await
    .unwrap();
  assert_eq!(
    *state.borrow(),
    ConnectionState::Reconnecting { attempt: 1, delay: Duration::from_secs(1) }
  );
  state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
  assert_elapsed(start, 1);
  assert_eq!(feed.connects(), 4);

  cancel.cancel();
  handle.await.unwrap().1.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_resubscribe_counts_as_a_failed_attempt() {
  let feed = FakeFeed::default();
  let first = feed.accept();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  conn.connect().await.unwrap();
  conn.subscribe_to_program("P1");
  conn.send_subscriptions().await.unwrap();

  // The second session opens but rejects the resubscribe request.
  let second = feed.accept();
  second.fail_sends.store(true, Ordering::SeqCst);
  let third = feed.accept();

  let mut state = conn.state();
  let cancel = CancellationToken::new();
  let handle = spawn_run(conn, &cancel);

  let start = Instant::now();
  drop(first);

  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 1, .. }))
    .await
    .unwrap();
  assert_eq!(
    *state.borrow(),
    ConnectionState::Reconnecting { attempt: 1, delay: Duration::from_secs(1) }
  );

  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 2, .. }))
    .await
    .unwrap();
  assert_eq!(
    *state.borrow(),
    ConnectionState::Reconnecting { attempt: 2, delay: Duration::from_secs(2) }
  );
  assert!(second.is_closed());
  assert!(second.sent().is_empty());

  state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
  assert_elapsed(start, 3);
  assert_eq!(feed.connects(), 3);
  assert_eq!(third.subscribe_requests(), vec![filters(&["P1"])]);

  cancel.cancel();
  handle.await.unwrap().1.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_returns_cleanly() {
  let feed = FakeFeed::default();
  let (mut conn, _rx) = connection(&feed, ReconnectPolicy::default());
  let mut state = conn.state();

  let cancel = CancellationToken::new();
  let handle = spawn_run(conn, &cancel);

  state
    .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
    .await
    .unwrap();
  cancel.cancel();

  let (conn, res) = handle.await.unwrap();
  res.unwrap();
  assert_eq!(conn.current_state(), ConnectionState::Disconnected);
  assert_eq!(feed.connects(), 0);
}

//! End-to-end tests over the in-memory transport: one client manager, one
//! server manager, physical links dropped and re-established at will.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use muxline_core::transport::memory::MemoryConnector;
use muxline_core::wire;
use muxline_core::{ChannelNumber, Link, Payload, SessionIdentity};
use muxline_session::{
    Channel, ClientManager, LifecycleEvent, ManagerConfig, ServerManager, SessionError,
    StaticTokenAuthenticator,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

const IDENTITY: &str = "ab12cd34";

struct Harness {
    server: ServerManager,
    connector: MemoryConnector,
    client: ClientManager,
    opened: Arc<Mutex<Vec<Arc<Channel>>>>,
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl Harness {
    fn new(server: ServerManager, client_config: ManagerConfig) -> Self {
        let h = Self::unconnected(server, client_config);
        let _ = h.connector.connect(&h.server);
        h
    }

    /// Client and server wired up, no physical link yet.
    fn unconnected(server: ServerManager, client_config: ManagerConfig) -> Self {
        let connector = MemoryConnector::new();
        let client = ClientManager::with_identity(
            connector.client_link(),
            client_config,
            SessionIdentity::from(IDENTITY),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        client.on_lifecycle(move |e| sink.lock().push(e));
        Self {
            server,
            connector,
            client,
            opened: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    fn open() -> Self {
        Self::new(
            ServerManager::new(ManagerConfig::default()),
            ManagerConfig::default(),
        )
    }

    /// Register an echo factory for `name`: every `message` comes back on
    /// the same channel.
    fn echo(&self, name: &str) {
        let opened = self.opened.clone();
        self.server.on_open(name, move |channel| {
            let reply = Arc::downgrade(&channel);
            channel
                .on("message", move |payload| {
                    if let Some(channel) = reply.upgrade() {
                        let _ = channel.emit("message", payload).unwrap();
                    }
                })
                .unwrap();
            opened.lock().push(channel);
        });
    }

    fn reconnect(&self) {
        self.connector.drop_connection("transport close");
        let _ = self.connector.connect(&self.server);
    }

    fn server_channel(&self, number: u32) -> Arc<Channel> {
        self.opened
            .lock()
            .iter()
            .find(|c| c.number() == ChannelNumber(number))
            .cloned()
            .unwrap()
    }
}

fn collect(channel: &Channel, key: &str) -> Arc<Mutex<Vec<Payload>>> {
    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = got.clone();
    channel.on(key, move |p| sink.lock().push(p)).unwrap();
    got
}

#[test]
fn open_without_auth_invokes_factory_immediately() {
    let h = Harness::open();
    h.echo("chat");
    let link = h.connector.client_link();

    let _ = link.emit(
        wire::CONNECTION,
        json!({"name": "chat", "number": 0, "id": IDENTITY}),
    );

    let channel = h.server_channel(0);
    assert_eq!(channel.name(), "chat");
    assert_eq!(channel.event_name("message"), "message_0");
    assert!(h.connector.server_link().unwrap().router().has_handler("message_0"));
    assert!(
        h.server
            .session_for_identity(&SessionIdentity::from(IDENTITY))
            .is_some()
    );
}

#[test]
fn channels_do_not_cross_talk() {
    let h = Harness::open();
    let names = ["alpha", "beta", "gamma"];
    for name in names {
        h.echo(name);
    }
    let channels: Vec<_> = names
        .iter()
        .map(|n| h.client.open_channel(n).unwrap())
        .collect();
    let inboxes: Vec<_> = channels.iter().map(|c| collect(c, "message")).collect();

    let _ = channels[1].emit("message", "only beta").unwrap();

    assert!(inboxes[0].lock().is_empty());
    assert_eq!(*inboxes[1].lock(), vec![Payload::Text("only beta".into())]);
    assert!(inboxes[2].lock().is_empty());
}

#[test]
fn structured_and_primitive_round_trip() {
    let h = Harness::open();
    h.echo("chat");
    let chat = h.client.open_channel("chat").unwrap();
    let inbox = collect(&chat, "message");

    let raw = Arc::new(Mutex::new(Vec::new()));
    let sink = raw.clone();
    h.connector
        .server_link()
        .unwrap()
        .on("probe_0", Arc::new(move |v| sink.lock().push(v)));

    let _ = chat.emit("message", json!({"a": 1, "b": "x"})).unwrap();
    let _ = chat.emit("message", 42_i64).unwrap();
    let _ = chat.emit("probe", 42_i64).unwrap();

    assert_eq!(
        *inbox.lock(),
        vec![
            Payload::Structured(json!({"a": 1, "b": "x"})),
            Payload::from(json!(42)),
        ]
    );
    assert_eq!(*raw.lock(), vec![json!(42)]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_within_grace_preserves_handlers() {
    let h = Harness::open();
    h.echo("chat");
    h.echo("term");
    let chat = h.client.open_channel("chat").unwrap();
    let term = h.client.open_channel("term").unwrap();
    let chat_inbox = collect(&chat, "message");
    let term_inbox = collect(&term, "message");
    let first_link = h.connector.server_link().unwrap().id().clone();

    h.connector.drop_connection("transport close");
    tokio::time::sleep(Duration::from_secs(5)).await;
    let _ = h.connector.connect(&h.server);

    let new_link = h.connector.server_link().unwrap();
    assert_ne!(*new_link.id(), first_link);
    assert!(new_link.router().has_handler("message_0"));
    assert!(new_link.router().has_handler("message_1"));

    let _ = chat.emit("message", "after").unwrap();
    let _ = term.emit("message", json!({"cols": 80})).unwrap();
    assert_eq!(*chat_inbox.lock(), vec![Payload::Text("after".into())]);
    assert_eq!(
        *term_inbox.lock(),
        vec![Payload::Structured(json!({"cols": 80}))]
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.server.session_count(), 1);
    assert_eq!(h.server.link_count(), 1);
    assert!(!h.client.is_expired());
    assert_eq!(
        *h.events.lock(),
        vec![LifecycleEvent::Disconnect, LifecycleEvent::Reconnect]
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_grace_fails_challenge() {
    let server = ServerManager::new(ManagerConfig::default());
    let client_config = ManagerConfig::default().with_grace_period(Duration::from_secs(120));
    let h = Harness::new(server, client_config);
    h.echo("chat");
    let chat = h.client.open_channel("chat").unwrap();
    let _ = collect(&chat, "message");

    let disconnects = Arc::new(AtomicUsize::new(0));
    let d = disconnects.clone();
    h.server_channel(0)
        .on(wire::DISCONNECT, move |p| {
            assert_eq!(p, Payload::Null);
            let _ = d.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    h.connector.drop_connection("ping timeout");
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(h.server.session_count(), 0);

    let _ = h.connector.connect(&h.server);
    let new_link = h.connector.server_link().unwrap();
    assert!(!new_link.router().has_handler("message_0"));
    assert_eq!(
        *h.events.lock(),
        vec![
            LifecycleEvent::Disconnect,
            LifecycleEvent::Reconnect,
            LifecycleEvent::ChallengeFailed
        ]
    );
    assert!(h.client.is_expired());
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_identity_fails_challenge() {
    let h = Harness::open();
    let _ = h
        .connector
        .client_link()
        .emit(wire::CHALLENGE_RECONNECT, json!("zzzzzzzz"));
    assert_eq!(*h.events.lock(), vec![LifecycleEvent::ChallengeFailed]);
}

#[tokio::test(start_paused = true)]
async fn client_expiry_skips_challenge() {
    let h = Harness::open();
    h.echo("chat");
    let _ = h.client.open_channel("chat").unwrap();

    let challenges = Arc::new(AtomicUsize::new(0));
    h.connector.drop_connection("transport close");
    tokio::time::sleep(Duration::from_secs(31)).await;

    let _ = h.connector.connect(&h.server);
    let c = challenges.clone();
    // Replaces the server's handler on the fresh link.
    h.connector.server_link().unwrap().on(
        wire::CHALLENGE_RECONNECT,
        Arc::new(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        }),
    );
    h.connector.report(wire::RECONNECT);

    assert_eq!(challenges.load(Ordering::SeqCst), 0);
    assert!(h.client.is_expired());
    assert_eq!(
        h.events.lock().last().copied(),
        Some(LifecycleEvent::ChallengeFailed)
    );
}

#[test]
fn duplicate_challenge_is_idempotent() {
    let h = Harness::open();
    h.echo("chat");
    let chat = h.client.open_channel("chat").unwrap();
    let _ = collect(&chat, "message");
    let link = h.connector.server_link().unwrap();
    let before = link.router().handler_count();
    let channel = h.server_channel(0);
    let keys = channel.handler_count();

    let client_link = h.connector.client_link();
    let _ = client_link.emit(wire::CHALLENGE_RECONNECT, json!(IDENTITY));
    let _ = client_link.emit(wire::CHALLENGE_RECONNECT, json!(IDENTITY));

    assert_eq!(link.router().handler_count(), before);
    assert_eq!(channel.handler_count(), keys);
    assert!(h.events.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_reconnects_keep_handler_count() {
    let h = Harness::open();
    h.echo("chat");
    let chat = h.client.open_channel("chat").unwrap();
    let inbox = collect(&chat, "message");

    for _ in 0..3 {
        h.reconnect();
        let _ = h
            .connector
            .client_link()
            .emit(wire::CHALLENGE_RECONNECT, json!(IDENTITY));
    }

    assert_eq!(h.server_channel(0).handler_count(), 1);
    assert_eq!(h.opened.lock().len(), 1);
    assert_eq!(h.server.session_count(), 1);
    let _ = chat.emit("message", 7_i64).unwrap();
    assert_eq!(*inbox.lock(), vec![Payload::from(json!(7))]);
}

#[tokio::test]
async fn open_before_auth_is_dropped() {
    let auth = StaticTokenAuthenticator::new(vec!["s3cret".to_string()]);
    let server = ServerManager::with_authenticator(ManagerConfig::default(), Arc::new(auth));
    let h = Harness::new(server, ManagerConfig::default());
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let calls = factory_calls.clone();
    h.server.on_open("chat", move |_| {
        let _ = calls.fetch_add(1, Ordering::SeqCst);
    });

    let chat = h.client.open_channel("chat").unwrap();
    assert_eq!(factory_calls.load(Ordering::SeqCst), 0);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = h.client.authenticate("s3cret", move |reply| {
        let _ = tx.send(reply);
    });
    assert_eq!(rx.await.unwrap(), json!("success"));
    assert_eq!(*h.events.lock(), vec![LifecycleEvent::Connected]);

    assert!(h.client.resend_open(&chat).unwrap());
    assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_token_keeps_gate_closed() {
    let auth = StaticTokenAuthenticator::new(vec!["s3cret".to_string()]);
    let server = ServerManager::with_authenticator(ManagerConfig::default(), Arc::new(auth));
    let h = Harness::new(server, ManagerConfig::default());
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let calls = factory_calls.clone();
    h.server.on_open("chat", move |_| {
        let _ = calls.fetch_add(1, Ordering::SeqCst);
    });

    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = h.client.authenticate("guess", move |reply| {
        let _ = tx.send(reply);
    });
    assert_eq!(rx.await.unwrap(), json!("unauthorized"));
    let _ = h.client.open_channel("chat").unwrap();
    assert_eq!(factory_calls.load(Ordering::SeqCst), 0);
    assert!(h.events.lock().is_empty());
}

#[test]
fn duplicate_number_is_rejected_with_event() {
    let h = Harness::open();
    h.echo("chat");
    let rejections = Arc::new(Mutex::new(Vec::new()));
    let sink = rejections.clone();
    let client_link = h.connector.client_link();
    let open = json!({"name": "chat", "number": 0, "id": IDENTITY});
    let _ = client_link.emit(wire::CONNECTION, open.clone());
    client_link.on(
        wire::CONNECTION_REJECTED,
        Arc::new(move |v: Value| sink.lock().push(v)),
    );

    let _ = client_link.emit(wire::CONNECTION, open);

    assert_eq!(h.opened.lock().len(), 1);
    assert_eq!(
        *rejections.lock(),
        vec![json!({"name": "chat", "number": 0, "reason": "duplicate_number"})]
    );
}

#[test]
fn channel_limit_rejects_and_client_forgets_channel() {
    let server = ServerManager::new(ManagerConfig::default().with_max_channels(1));
    let h = Harness::new(server, ManagerConfig::default());
    h.echo("chat");
    let _ = h.client.open_channel("chat").unwrap();
    let second = h.client.open_channel("chat").unwrap();

    assert_eq!(h.opened.lock().len(), 1);
    assert!(h.client.session().channel(second.number()).is_none());
    assert!(h.client.active_channel().is_none());
    assert_eq!(*h.events.lock(), vec![LifecycleEvent::ConnectionRejected]);
}

#[test]
fn open_without_factory_still_creates_channel() {
    let h = Harness::open();
    let _ = h.client.open_channel("nobody").unwrap();
    let session = h
        .server
        .session_for_identity(&SessionIdentity::from(IDENTITY))
        .unwrap();
    assert_eq!(session.channel(ChannelNumber(0)).unwrap().name(), "nobody");

    h.echo("nobody");
    assert!(h.opened.lock().is_empty());
}

#[test]
fn off_open_stops_factory() {
    let h = Harness::open();
    h.echo("chat");
    assert!(h.server.off_open("chat"));
    assert!(!h.server.off_open("chat"));
    let _ = h.client.open_channel("chat").unwrap();
    assert!(h.opened.lock().is_empty());
}

#[test]
fn expired_client_refuses_new_channels() {
    let h = Harness::open();
    let _ = h
        .connector
        .client_link()
        .emit(wire::CHALLENGE_RECONNECT, json!("zzzzzzzz"));
    assert_matches!(h.client.open_channel("chat"), Err(SessionError::TornDown));

    let _ = h.client.renew();
    h.echo("chat");
    let _ = h.client.open_channel("chat").unwrap();
    assert_eq!(h.opened.lock().len(), 1);
}

#[test]
fn resending_accepted_open_keeps_channel() {
    let h = Harness::open();
    h.echo("chat");
    let chat = h.client.open_channel("chat").unwrap();
    let inbox = collect(&chat, "message");

    assert!(h.client.resend_open(&chat).unwrap());
    assert_eq!(h.opened.lock().len(), 1);
    assert!(h.client.session().channel(ChannelNumber(0)).is_some());

    let _ = chat.emit("message", json!({"a": 1})).unwrap();
    assert_eq!(*inbox.lock(), vec![Payload::Structured(json!({"a": 1}))]);
    assert!(h.events.lock().is_empty());
}

#[test]
fn open_before_first_connect_reaches_factory() {
    let h = Harness::unconnected(
        ServerManager::new(ManagerConfig::default()),
        ManagerConfig::default(),
    );
    h.echo("chat");
    let chat = h.client.open_channel("chat").unwrap();
    let inbox = collect(&chat, "message");
    assert!(h.opened.lock().is_empty());
    assert_eq!(h.client.unsent_opens(), 1);

    let _ = h.connector.connect(&h.server);
    assert_eq!(h.opened.lock().len(), 1);
    assert_eq!(h.client.unsent_opens(), 0);

    let _ = chat.emit("message", "hello").unwrap();
    assert_eq!(*inbox.lock(), vec![Payload::Text("hello".into())]);
}

#[tokio::test(start_paused = true)]
async fn open_during_outage_lands_on_rebound_session() {
    let h = Harness::open();
    h.echo("chat");
    h.echo("term");
    let _chat = h.client.open_channel("chat").unwrap();

    h.connector.drop_connection("transport close");
    let term = h.client.open_channel("term").unwrap();
    assert_eq!(h.client.unsent_opens(), 1);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let _ = h.connector.connect(&h.server);

    assert_eq!(h.client.unsent_opens(), 0);
    assert_eq!(h.opened.lock().len(), 2);
    let session = h
        .server
        .session_for_identity(&SessionIdentity::from(IDENTITY))
        .unwrap();
    assert_eq!(session.channel_count(), 2);
    assert_eq!(session.link_id(), *h.connector.server_link().unwrap().id());

    let inbox = collect(&term, "message");
    let _ = term.emit("message", "late").unwrap();
    assert_eq!(*inbox.lock(), vec![Payload::Text("late".into())]);
    assert_eq!(
        *h.events.lock(),
        vec![LifecycleEvent::Disconnect, LifecycleEvent::Reconnect]
    );
}

//! End-to-end chat flow: real server, real clients, real TCP.
//!
//! 1. The server is started in-process with the built-in commands.
//! 2. Two full clients (the client library, not raw packets) join.
//! 3. Join notices, chat broadcasts, `/list`, `/ping`, and the logout
//!    notice are all observed from the receiving side.

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use client::{ClientEvent, ClientNetworking};
use server::{CommandRegistry, ServerApp, ServerNetworking};
use tokio::sync::mpsc;
use tokio::time::timeout;

const HEARTBEAT: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Spin up an in-process server with `/list` and `/ping` registered.
/// Returns the local address the server is bound to.
async fn start_server(password: Option<&str>, pong_corpus: &std::path::Path) -> SocketAddr {
    let commands = CommandRegistry::builtin(pong_corpus.to_path_buf());
    let networking = Arc::new(ServerNetworking::new());
    let app = ServerApp::new(commands);
    app.attach(&networking);

    let password = password.map(ToOwned::to_owned);
    {
        let networking = Arc::clone(&networking);
        tokio::spawn(async move {
            networking
                .serve("127.0.0.1", 0, password)
                .await
                .expect("serve");
        });
    }
    timeout(Duration::from_secs(1), networking.bound_addr())
        .await
        .expect("bind timeout")
        .expect("bound address")
}

struct Member {
    networking: Arc<ClientNetworking>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Member {
    async fn join(addr: SocketAddr, username: &str, password: Option<&str>) -> Self {
        let networking = ClientNetworking::with_heartbeat_interval(HEARTBEAT);
        let (tx, events) = mpsc::unbounded_channel();
        networking
            .events()
            .subscribe(Arc::new(move |event: &ClientEvent| {
                let _ = tx.send(event.clone());
            }));
        networking
            .join("127.0.0.1", addr.port(), username, password)
            .await
            .expect("join");
        Member { networking, events }
    }

    async fn next_message(&mut self) -> (Option<String>, String) {
        loop {
            match timeout(Duration::from_secs(2), self.events.recv())
                .await
                .expect("message timeout")
                .expect("event stream ended")
            {
                ClientEvent::MessageReceived { username, text } => return (username, text),
                ClientEvent::ConnectionLost(err) => panic!("connection lost: {err}"),
            }
        }
    }

    async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(event)) = timeout(window, self.events.recv()).await {
            panic!("unexpected event: {event:?}");
        }
    }
}

fn pong_corpus(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp corpus");
    for line in lines {
        writeln!(file, "{line}").expect("write corpus");
    }
    file
}

// ---------------------------------------------------------------------------
// The flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_clients_chat_command_and_part_ways() {
    let corpus = pong_corpus(&["The server waves back."]);
    let addr = start_server(Some("hunter2"), corpus.path()).await;

    let mut alice = Member::join(addr, "alice", Some("hunter2")).await;
    let mut bob = Member::join(addr, "bob", Some("hunter2")).await;

    // Alice hears that bob joined; bob hears nothing about himself.
    assert_eq!(
        alice.next_message().await,
        (None, "User bob has joined!".to_owned())
    );

    // A chat message reaches the other member only.
    alice
        .networking
        .send_message("hi bob")
        .await
        .expect("send message");
    assert_eq!(
        bob.next_message().await,
        (Some("alice".to_owned()), "hi bob".to_owned())
    );
    alice.expect_silence(Duration::from_millis(200)).await;

    // `/list` answers the sender privately with everyone's name.
    bob.networking.send_message("/list").await.expect("list");
    let (sender, text) = bob.next_message().await;
    assert_eq!(sender, None);
    let names = text
        .strip_prefix("Connected users: ")
        .expect("list prefix")
        .split(", ")
        .collect::<std::collections::HashSet<_>>();
    assert_eq!(names, ["alice", "bob"].into_iter().collect());
    alice.expect_silence(Duration::from_millis(200)).await;

    // `/ping` answers with the (single-line, hence deterministic) corpus.
    bob.networking.send_message("/ping").await.expect("ping");
    assert_eq!(
        bob.next_message().await,
        (None, "The server waves back.".to_owned())
    );

    // A graceful disconnect is announced as a normal departure.
    bob.networking.disconnect().expect("bob disconnect");
    assert_eq!(
        alice.next_message().await,
        (None, "User bob has left!".to_owned())
    );

    alice.networking.disconnect().expect("alice disconnect");
}

#[tokio::test]
async fn wrong_password_is_surfaced_by_the_client() {
    let corpus = pong_corpus(&[]);
    let addr = start_server(Some("pw"), corpus.path()).await;

    let networking = ClientNetworking::new();
    let err = networking
        .join("127.0.0.1", addr.port(), "alice", Some("nope"))
        .await
        .expect_err("wrong password");
    assert!(matches!(err, client::ClientError::WrongPassword));
    assert!(!networking.is_connected());
}

//! Heartbeat liveness end to end: a silent peer is declared lost and the
//! survivors hear about it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{ChatConnection, Packet, ResponseCode};
use client::{ClientEvent, ClientNetworking};
use server::{CommandRegistry, ServerApp, ServerNetworking};
use tokio::sync::mpsc;
use tokio::time::timeout;

const LIVENESS: Duration = Duration::from_millis(150);

async fn start_server() -> SocketAddr {
    let networking = Arc::new(ServerNetworking::with_liveness(LIVENESS));
    let app = ServerApp::new(CommandRegistry::new());
    app.attach(&networking);
    {
        let networking = Arc::clone(&networking);
        tokio::spawn(async move {
            networking.serve("127.0.0.1", 0, None).await.expect("serve");
        });
    }
    timeout(Duration::from_secs(1), networking.bound_addr())
        .await
        .expect("bind timeout")
        .expect("bound address")
}

#[tokio::test]
async fn a_client_that_never_heartbeats_is_declared_lost() {
    let addr = start_server().await;

    // The survivor: a full client whose heartbeat task outpaces the window.
    let alice = ClientNetworking::with_heartbeat_interval(Duration::from_millis(50));
    let (tx, mut alice_events) = mpsc::unbounded_channel();
    alice
        .events()
        .subscribe(Arc::new(move |event: &ClientEvent| {
            let _ = tx.send(event.clone());
        }));
    alice
        .join("127.0.0.1", addr.port(), "alice", None)
        .await
        .expect("alice join");

    // The ghost: logs in over a raw connection and then goes quiet.
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let ghost = ChatConnection::new(stream);
    ghost.start();
    let code = ghost
        .send_and_wait(&Packet::Login {
            username: "ghost".to_owned(),
            password: None,
        })
        .await
        .expect("ghost login");
    assert_eq!(code, ResponseCode::Ok);

    // Alice hears the join first, then the eviction notice.
    let notice = timeout(Duration::from_secs(3), async {
        loop {
            match alice_events.recv().await.expect("event stream ended") {
                ClientEvent::MessageReceived {
                    username: None,
                    text,
                } if text == "User ghost has lost the connection to the server!" => break,
                ClientEvent::MessageReceived { .. } => continue,
                ClientEvent::ConnectionLost(err) => panic!("alice lost her connection: {err}"),
            }
        }
    })
    .await;
    assert!(notice.is_ok(), "no eviction notice within the deadline");

    // The ghost's connection was actually torn down by the server.
    timeout(Duration::from_secs(2), async {
        while !ghost.is_closed() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("ghost connection should be closed");

    // Alice herself survived the whole affair.
    alice.send_message("still alive").await.expect("alice lives");
    alice.disconnect().expect("alice disconnect");
}

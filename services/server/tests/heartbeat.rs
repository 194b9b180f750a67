//! Heartbeat liveness: quiet clients get evicted, chatty ones stay.
//!
//! The server runs with a shortened liveness window so the sweep fires
//! within test time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{ChatConnection, ConnectionEvent, Packet, ResponseCode};
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

async fn login(addr: SocketAddr, username: &str) -> (ChatConnection, mpsc::UnboundedReceiver<Packet>) {
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let conn = ChatConnection::new(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    conn.events()
        .subscribe(Arc::new(move |event: &ConnectionEvent| {
            if let ConnectionEvent::PacketReceived(packet) = event {
                let _ = tx.send(packet.clone());
            }
        }));
    conn.start();
    let code = conn
        .send_and_wait(&Packet::Login {
            username: username.to_owned(),
            password: None,
        })
        .await
        .expect("login response");
    assert_eq!(code, ResponseCode::Ok);
    (conn, rx)
}

fn keep_alive(conn: &ChatConnection) -> tokio::task::JoinHandle<()> {
    let conn = conn.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(50));
        loop {
            tick.tick().await;
            if conn.send(&Packet::Heartbeat).is_err() {
                break;
            }
        }
    })
}

#[tokio::test]
async fn a_silent_client_is_evicted_and_announced_as_lost() {
    let addr = start_server().await;

    let (alice_conn, _alice_rx) = login(addr, "alice").await;
    let (bob_conn, mut bob_rx) = login(addr, "bob").await;
    let heartbeats = keep_alive(&bob_conn);

    // Alice never heartbeats: the sweep should kick her out and tell bob.
    let announced = timeout(Duration::from_secs(3), async {
        loop {
            match bob_rx.recv().await {
                Some(Packet::Message { username: None, text })
                    if text == "User alice has lost the connection to the server!" =>
                {
                    break;
                }
                Some(_) => continue,
                None => panic!("bob's connection dropped"),
            }
        }
    })
    .await;
    assert!(announced.is_ok(), "no eviction notice within the deadline");

    // The evicted connection is actually torn down.
    timeout(Duration::from_secs(2), async {
        while !alice_conn.is_closed() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("evicted connection should be closed");

    heartbeats.abort();
}

#[tokio::test]
async fn a_heartbeating_client_outlives_many_liveness_windows() {
    let addr = start_server().await;

    let (alice_conn, _alice_rx) = login(addr, "alice").await;
    let heartbeats = keep_alive(&alice_conn);

    tokio::time::sleep(LIVENESS * 4).await;

    // Still logged in: messages are accepted, not rejected.
    let code = alice_conn
        .send_and_wait(&Packet::Message {
            username: Some("alice".to_owned()),
            text: "still here".to_owned(),
        })
        .await
        .expect("message response");
    assert_eq!(code, ResponseCode::Ok);

    heartbeats.abort();
}

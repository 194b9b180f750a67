//! Login contention: one username, many simultaneous claimants.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{ChatConnection, Packet, ResponseCode};
use futures_util::future::join_all;
use server::{CommandRegistry, ServerApp, ServerNetworking};
use tokio::time::timeout;

async fn start_server() -> (Arc<ServerNetworking>, SocketAddr) {
    let networking = Arc::new(ServerNetworking::new());
    let app = ServerApp::new(CommandRegistry::new());
    app.attach(&networking);
    {
        let networking = Arc::clone(&networking);
        tokio::spawn(async move {
            networking.serve("127.0.0.1", 0, None).await.expect("serve");
        });
    }
    let addr = timeout(Duration::from_secs(1), networking.bound_addr())
        .await
        .expect("bind timeout")
        .expect("bound address");
    (networking, addr)
}

async fn raw_connection(addr: SocketAddr) -> ChatConnection {
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let conn = ChatConnection::new(stream);
    conn.start();
    conn
}

#[tokio::test]
async fn n_parallel_logins_admit_exactly_one() {
    let (_networking, addr) = start_server().await;

    const CLAIMANTS: usize = 5;
    let mut connections = Vec::with_capacity(CLAIMANTS);
    for _ in 0..CLAIMANTS {
        connections.push(raw_connection(addr).await);
    }

    let login = Packet::Login {
        username: "dave".to_owned(),
        password: None,
    };
    let attempts = connections
        .iter()
        .map(|conn| conn.send_and_wait(&login))
        .collect::<Vec<_>>();
    let codes = timeout(Duration::from_secs(2), join_all(attempts))
        .await
        .expect("logins timeout")
        .into_iter()
        .map(|result| result.expect("login response"))
        .collect::<Vec<_>>();

    let winners = codes
        .iter()
        .filter(|code| **code == ResponseCode::Ok)
        .count();
    let losers = codes
        .iter()
        .filter(|code| **code == ResponseCode::TakenUsername)
        .count();
    assert_eq!(winners, 1, "codes: {codes:?}");
    assert_eq!(losers, CLAIMANTS - 1, "codes: {codes:?}");

    for conn in &connections {
        conn.close();
    }
}

#[tokio::test]
async fn the_freed_username_can_be_claimed_again() {
    let (_networking, addr) = start_server().await;

    let first = raw_connection(addr).await;
    let login = Packet::Login {
        username: "erin".to_owned(),
        password: None,
    };
    assert_eq!(
        first.send_and_wait(&login).await.expect("login"),
        ResponseCode::Ok
    );

    let second = raw_connection(addr).await;
    assert_eq!(
        second.send_and_wait(&login).await.expect("login"),
        ResponseCode::TakenUsername
    );

    // Log the first claimant out; the name becomes available.
    first.send(&Packet::Logout).expect("logout");
    let reclaimed = timeout(Duration::from_secs(2), async {
        loop {
            match second.send_and_wait(&login).await.expect("login") {
                ResponseCode::Ok => break,
                ResponseCode::TakenUsername => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                other => panic!("unexpected login response: {other:?}"),
            }
        }
    })
    .await;
    assert!(reclaimed.is_ok(), "username was never freed");

    second.close();
}

#[tokio::test]
async fn serving_twice_on_one_instance_is_rejected() {
    let (networking, _addr) = start_server().await;
    let err = networking
        .serve("127.0.0.1", 0, None)
        .await
        .expect_err("second serve");
    assert!(matches!(err, server::ServerError::AlreadyRunning));
}

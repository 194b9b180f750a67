//! Client networking: session establishment, login, messages, heartbeats.
//!
//! # Session lifecycle
//! 1. `join` opens the TCP connection and performs the login handshake.
//! 2. On success a heartbeat task keeps the session alive (one heartbeat
//!    immediately, then one per interval).
//! 3. `disconnect` sends a best-effort logout and closes; a drop the client
//!    did not initiate is surfaced as [`ClientEvent::ConnectionLost`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_protocol::events::Listeners;
use chat_protocol::{ChatConnection, ConnectionError, ConnectionEvent, Packet, ResponseCode};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("already connected to a server")]
    AlreadyConnected,
    #[error("the destination {0} is unreachable")]
    DestinationUnreachable(String),
    #[error("the username is invalid, try a different one")]
    InvalidUsername,
    #[error("the username is already taken, try another one")]
    UsernameTaken,
    #[error("the server password is incorrect")]
    WrongPassword,
    #[error("the server rejected the login")]
    LoginRejected,
    #[error("the message was rejected by the server")]
    MessageRejected,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Events surfaced to the UI layer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A chat message arrived; no username means a system message.
    MessageReceived {
        username: Option<String>,
        text: String,
    },
    /// The server connection dropped without a prior `disconnect` call.
    ConnectionLost(ConnectionError),
}

struct Session {
    /// Distinguishes this session from earlier ones on the same client, so a
    /// stale close event cannot tear down a newer session.
    token: u64,
    conn: ChatConnection,
    heartbeat: JoinHandle<()>,
    username: String,
}

pub struct ClientNetworking {
    events: Listeners<ClientEvent>,
    session: Mutex<Option<Session>>,
    next_token: AtomicU64,
    heartbeat_interval: Duration,
}

impl ClientNetworking {
    pub fn new() -> Arc<Self> {
        Self::with_heartbeat_interval(HEARTBEAT_INTERVAL)
    }

    /// Use a non-default heartbeat interval.
    pub fn with_heartbeat_interval(interval: Duration) -> Arc<Self> {
        Arc::new(ClientNetworking {
            events: Listeners::new(),
            session: Mutex::new(None),
            next_token: AtomicU64::new(0),
            heartbeat_interval: interval,
        })
    }

    /// The event stream consumed by the UI layer.
    pub fn events(&self) -> &Listeners<ClientEvent> {
        &self.events
    }

    /// The username of the active session, if any.
    pub fn username(&self) -> Option<String> {
        self.session
            .lock()
            .expect("session slot poisoned")
            .as_ref()
            .map(|session| session.username.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .expect("session slot poisoned")
            .as_ref()
            .is_some_and(|session| !session.conn.is_closed())
    }

    /// Connect to a server and log in.
    ///
    /// Every failure path (and cancellation of this future) tears the
    /// half-built connection down before surfacing the error.
    pub async fn join(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        username: &str,
        password: Option<&str>,
    ) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        info!(host = %host, port, username = %username, "joining server");
        let stream = TcpStream::connect((host, port)).await.map_err(|err| {
            debug!(error = %err, "connect failed");
            ClientError::DestinationUnreachable(format!("{host}:{port}"))
        })?;

        let conn = ChatConnection::new(stream);
        let guard = CloseGuard::new(&conn);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        // The listener must not keep the networking object alive.
        let this = Arc::downgrade(self);
        conn.events()
            .subscribe(Arc::new(move |event: &ConnectionEvent| {
                let Some(networking) = this.upgrade() else {
                    return;
                };
                match event {
                    ConnectionEvent::PacketReceived(Packet::Message { username, text }) => {
                        networking.events.emit(&ClientEvent::MessageReceived {
                            username: username.clone(),
                            text: text.clone(),
                        });
                    }
                    ConnectionEvent::Closed(err) => {
                        networking.on_connection_lost(token, err.clone());
                    }
                    _ => {}
                }
            }));
        conn.start();

        let code = conn
            .send_and_wait(&Packet::Login {
                username: username.to_owned(),
                password: password.map(ToOwned::to_owned),
            })
            .await?;
        match code {
            ResponseCode::Ok => {}
            ResponseCode::InvalidUsername => return Err(ClientError::InvalidUsername),
            ResponseCode::TakenUsername => return Err(ClientError::UsernameTaken),
            ResponseCode::WrongPassword => return Err(ClientError::WrongPassword),
            other => {
                debug!(code = ?other, "unexpected login response");
                return Err(ClientError::LoginRejected);
            }
        }

        guard.defuse();
        let heartbeat = self.spawn_heartbeat(conn.clone());
        *self.session.lock().expect("session slot poisoned") = Some(Session {
            token,
            conn,
            heartbeat,
            username: username.to_owned(),
        });
        info!(username = %username, "logged in");
        Ok(())
    }

    /// Send a chat message and wait for the server's verdict.
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        let (conn, username) = {
            let session = self.session.lock().expect("session slot poisoned");
            match session.as_ref() {
                Some(session) if !session.conn.is_closed() => {
                    (session.conn.clone(), session.username.clone())
                }
                _ => return Err(ClientError::Connection(ConnectionError::Closed)),
            }
        };
        let code = conn
            .send_and_wait(&Packet::Message {
                username: Some(username),
                text: text.to_owned(),
            })
            .await?;
        if code != ResponseCode::Ok {
            return Err(ClientError::MessageRejected);
        }
        Ok(())
    }

    /// Leave the server: best-effort logout, then close.
    ///
    /// Silently ignored when there is no active session. A failure to queue
    /// the logout packet is logged and surfaced as a network error; the
    /// connection is closed either way.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        let session = self.session.lock().expect("session slot poisoned").take();
        let Some(session) = session else {
            return Ok(());
        };
        info!("disconnecting from the server");
        session.heartbeat.abort();
        if session.conn.is_closed() {
            return Ok(());
        }
        let logout = session.conn.send(&Packet::Logout);
        session.conn.close();
        logout.map_err(|err| {
            warn!(error = %err, "failed to send the logout packet");
            ClientError::Connection(ConnectionError::Network(format!(
                "failed to send the logout packet: {err}"
            )))
        })
    }

    fn on_connection_lost(&self, token: u64, err: Option<ConnectionError>) {
        let session = {
            let mut slot = self.session.lock().expect("session slot poisoned");
            match slot.as_ref() {
                Some(session) if session.token == token => slot.take(),
                _ => None,
            }
        };
        let Some(session) = session else {
            // `disconnect` ran first, the session never completed, or the
            // event belongs to an older connection: the drop was expected.
            debug!("connection closed");
            return;
        };
        session.heartbeat.abort();
        let err = err.unwrap_or(ConnectionError::Closed);
        warn!(error = %err, "connection lost unexpectedly");
        self.events.emit(&ClientEvent::ConnectionLost(err));
    }

    fn spawn_heartbeat(&self, conn: ChatConnection) -> JoinHandle<()> {
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                debug!("sending a heartbeat");
                if conn.send(&Packet::Heartbeat).is_err() {
                    // The connection events already report the loss.
                    break;
                }
            }
        })
    }
}

/// Closes the wrapped connection on drop unless defused; keeps a cancelled
/// or failed `join` from leaking a half-open connection.
struct CloseGuard {
    conn: Option<ChatConnection>,
}

impl CloseGuard {
    fn new(conn: &ChatConnection) -> Self {
        CloseGuard {
            conn: Some(conn.clone()),
        }
    }

    fn defuse(mut self) {
        self.conn = None;
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(conn) = &self.conn {
            conn.close();
        }
    }
}

//! Server networking: accept loop, per-packet dispatch, heartbeat monitor.
//!
//! All connection state is owned by the single task driving
//! [`ServerNetworking::serve`], so dispatch needs no locks and the
//! validate-and-claim step of a login is atomic with respect to concurrent
//! logins. Higher-level consumers subscribe to [`ServerEvent`]s.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chat_protocol::events::Listeners;
use chat_protocol::validators::{valid_message, valid_username};
use chat_protocol::{ChatConnection, ConnectionError, ConnectionEvent, Packet, ResponseCode};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default heartbeat sweep period and liveness window.
const HEARTBEAT_LIVENESS: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("the server is already running")]
    AlreadyRunning,
    #[error("failed to bind the listening socket: {0}")]
    Bind(#[from] std::io::Error),
}

/// Events published to the server application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A connection completed a login; carries a send handle for the roster.
    UserJoined {
        username: String,
        connection: ChatConnection,
    },
    /// A logged-in user is gone. `err` is `None` for a graceful logout.
    UserLeft {
        username: String,
        err: Option<ConnectionError>,
    },
    /// A logged-in user sent a chat message that passed validation.
    MessageReceived { sender: String, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnId(u64);

/// Per-connection server-side state.
struct Connection {
    conn: ChatConnection,
    peer: SocketAddr,
    username: Option<String>,
    connected_at: Instant,
    last_heartbeat: Option<Instant>,
}

impl Connection {
    fn new(conn: ChatConnection, peer: SocketAddr) -> Self {
        Connection {
            conn,
            peer,
            username: None,
            connected_at: Instant::now(),
            last_heartbeat: None,
        }
    }

    fn last_seen(&self) -> Instant {
        self.last_heartbeat.unwrap_or(self.connected_at)
    }
}

pub struct ServerNetworking {
    events: Listeners<ServerEvent>,
    running: AtomicBool,
    bound: watch::Sender<Option<SocketAddr>>,
    liveness: Duration,
}

impl Default for ServerNetworking {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerNetworking {
    pub fn new() -> Self {
        Self::with_liveness(HEARTBEAT_LIVENESS)
    }

    /// Use a non-default heartbeat liveness window (and sweep period).
    pub fn with_liveness(liveness: Duration) -> Self {
        let (bound, _) = watch::channel(None);
        ServerNetworking {
            events: Listeners::new(),
            running: AtomicBool::new(false),
            bound,
            liveness,
        }
    }

    /// The event stream consumed by the server application.
    pub fn events(&self) -> &Listeners<ServerEvent> {
        &self.events
    }

    /// Wait for the listener to come up and return its local address.
    ///
    /// Useful when serving on port 0.
    pub async fn bound_addr(&self) -> Option<SocketAddr> {
        let mut rx = self.bound.subscribe();
        let addr = rx.wait_for(Option::is_some).await.ok()?;
        *addr
    }

    /// Bind `host:port` and serve until the future is dropped.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] on re-entry and with
    /// [`ServerError::Bind`] when the listening socket cannot be bound.
    pub async fn serve(
        &self,
        host: &str,
        port: u16,
        password: Option<String>,
    ) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        let _ = self.bound.send(Some(addr));
        info!(addr = %addr, "server listening");

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<(ConnId, ConnectionEvent)>();
        let mut connections: HashMap<ConnId, Connection> = HashMap::new();
        let mut next_id = 0u64;

        let mut sweep = tokio::time::interval(self.liveness);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.reset();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        let id = ConnId(next_id);
                        let conn = ChatConnection::new(stream);
                        let tx = event_tx.clone();
                        conn.events().subscribe(Arc::new(move |event: &ConnectionEvent| {
                            let _ = tx.send((id, event.clone()));
                        }));
                        connections.insert(id, Connection::new(conn.clone(), peer));
                        conn.start();
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some((id, event)) = event_rx.recv() => {
                    self.dispatch(&mut connections, id, event, password.as_deref());
                }
                _ = sweep.tick() => {
                    self.sweep_dead_connections(&mut connections);
                }
            }
        }
    }

    fn dispatch(
        &self,
        connections: &mut HashMap<ConnId, Connection>,
        id: ConnId,
        event: ConnectionEvent,
        password: Option<&str>,
    ) {
        match event {
            ConnectionEvent::Opened => {
                if let Some(connection) = connections.get(&id) {
                    info!(peer = %connection.peer, "new connection");
                }
            }
            ConnectionEvent::PacketReceived(packet) => {
                self.handle_packet(connections, id, packet, password);
            }
            ConnectionEvent::Closed(err) => self.handle_close(connections, id, err),
        }
    }

    fn handle_packet(
        &self,
        connections: &mut HashMap<ConnId, Connection>,
        id: ConnId,
        packet: Packet,
        password: Option<&str>,
    ) {
        debug!(packet = ?packet, "packet received");
        match packet {
            Packet::Login {
                username,
                password: supplied,
            } => self.handle_login(connections, id, username, supplied, password),
            Packet::Message { text, .. } => self.handle_message(connections, id, text),
            Packet::Heartbeat => {
                if let Some(connection) = connections.get_mut(&id) {
                    connection.last_heartbeat = Some(Instant::now());
                }
            }
            Packet::Logout => {
                let Some(connection) = connections.get_mut(&id) else {
                    return;
                };
                // Clearing the username marks the departure as reported, so
                // the close path does not emit a second `UserLeft`.
                if let Some(username) = connection.username.take() {
                    self.events.emit(&ServerEvent::UserLeft {
                        username,
                        err: None,
                    });
                    connection.conn.close();
                }
            }
            Packet::Response(code) => {
                warn!(code = ?code, "unexpected response packet, closing the connection");
                if let Some(connection) = connections.get(&id) {
                    connection.conn.close();
                }
            }
        }
    }

    fn handle_login(
        &self,
        connections: &mut HashMap<ConnId, Connection>,
        id: ConnId,
        username: String,
        supplied: Option<String>,
        password: Option<&str>,
    ) {
        let response = if !valid_username(&username) {
            ResponseCode::InvalidUsername
        } else if Self::username_taken(connections, &username) {
            ResponseCode::TakenUsername
        } else if supplied.as_deref().unwrap_or("") != password.unwrap_or("") {
            // An absent password and an empty one compare equal.
            ResponseCode::WrongPassword
        } else {
            ResponseCode::Ok
        };

        let Some(connection) = connections.get_mut(&id) else {
            return;
        };
        if let Err(err) = connection.conn.send(&Packet::Response(response)) {
            warn!(peer = %connection.peer, error = %err, "failed to answer login");
            return;
        }
        if response == ResponseCode::Ok {
            connection.username = Some(username.clone());
            info!(username = %username, peer = %connection.peer, "login accepted");
            self.events.emit(&ServerEvent::UserJoined {
                username,
                connection: connection.conn.clone(),
            });
        } else {
            debug!(username = %username, code = ?response, "login rejected");
        }
    }

    fn handle_message(
        &self,
        connections: &mut HashMap<ConnId, Connection>,
        id: ConnId,
        text: String,
    ) {
        let Some(connection) = connections.get(&id) else {
            return;
        };
        // The sender is whoever owns the connection, never the wire field.
        let sender = match &connection.username {
            Some(sender) if valid_message(&text) => sender.clone(),
            _ => {
                if let Err(err) = connection
                    .conn
                    .send(&Packet::Response(ResponseCode::InvalidMessage))
                {
                    warn!(peer = %connection.peer, error = %err, "failed to reject message");
                }
                return;
            }
        };
        if let Err(err) = connection.conn.send(&Packet::Response(ResponseCode::Ok)) {
            warn!(peer = %connection.peer, error = %err, "failed to acknowledge message");
            return;
        }
        self.events
            .emit(&ServerEvent::MessageReceived { sender, text });
    }

    fn handle_close(
        &self,
        connections: &mut HashMap<ConnId, Connection>,
        id: ConnId,
        err: Option<ConnectionError>,
    ) {
        let Some(connection) = connections.remove(&id) else {
            return;
        };
        info!(peer = %connection.peer, err = ?err, "connection closed");
        if let Some(username) = connection.username {
            self.events.emit(&ServerEvent::UserLeft {
                username,
                err: Some(err.unwrap_or(ConnectionError::Closed)),
            });
        }
    }

    fn sweep_dead_connections(&self, connections: &mut HashMap<ConnId, Connection>) {
        for connection in connections.values_mut() {
            if connection.username.is_none() {
                continue;
            }
            if connection.last_seen().elapsed() <= self.liveness {
                continue;
            }
            if let Some(username) = connection.username.take() {
                warn!(username = %username, "heartbeat timed out, evicting");
                self.events.emit(&ServerEvent::UserLeft {
                    username,
                    err: Some(ConnectionError::Closed),
                });
                connection.conn.close();
            }
        }
    }

    fn username_taken(connections: &HashMap<ConnId, Connection>, username: &str) -> bool {
        connections
            .values()
            .any(|connection| connection.username.as_deref() == Some(username))
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

//! Server application: the roster of logged-in users and message routing.
//!
//! Mutates the roster only in response to [`ServerEvent`]s, which all arrive
//! from the networking dispatch task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chat_protocol::{ChatConnection, ConnectionError, Packet};
use tracing::{debug, info, warn};

use crate::commands::CommandRegistry;
use crate::networking::{ServerEvent, ServerNetworking};

pub struct ServerApp {
    roster: Mutex<HashMap<String, ChatConnection>>,
    commands: CommandRegistry,
}

impl ServerApp {
    /// Build the application around a command registry assembled by the
    /// caller (usually `main`).
    pub fn new(commands: CommandRegistry) -> Arc<Self> {
        Arc::new(ServerApp {
            roster: Mutex::new(HashMap::new()),
            commands,
        })
    }

    /// Subscribe to the networking layer's events.
    pub fn attach(self: &Arc<Self>, networking: &ServerNetworking) {
        let app = Arc::clone(self);
        networking
            .events()
            .subscribe(Arc::new(move |event: &ServerEvent| app.on_event(event)));
    }

    fn on_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::UserJoined {
                username,
                connection,
            } => self.on_user_joined(username, connection),
            ServerEvent::UserLeft { username, err } => self.on_user_left(username, err.as_ref()),
            ServerEvent::MessageReceived { sender, text } => {
                self.on_message_received(sender, text);
            }
        }
    }

    fn on_user_joined(&self, username: &str, connection: &ChatConnection) {
        // Announce first, insert second: the joiner does not see their own
        // join notice.
        self.broadcast(None, &format!("User {username} has joined!"));
        self.roster
            .lock()
            .expect("roster poisoned")
            .insert(username.to_owned(), connection.clone());
        info!(username = %username, "user joined");
    }

    fn on_user_left(&self, username: &str, err: Option<&ConnectionError>) {
        let removed = self
            .roster
            .lock()
            .expect("roster poisoned")
            .remove(username);
        if removed.is_none() {
            debug!(username = %username, "departure for a user not in the roster, ignoring");
            return;
        }
        info!(username = %username, err = ?err, "user left");
        if err.is_none() {
            self.broadcast(None, &format!("User {username} has left!"));
        } else {
            self.broadcast(
                None,
                &format!("User {username} has lost the connection to the server!"),
            );
        }
    }

    fn on_message_received(&self, sender: &str, text: &str) {
        if text.starts_with('/') {
            let mut tokens = text.split_whitespace();
            let command = tokens.next().map(|t| &t[1..]).unwrap_or_default();
            let args: Vec<&str> = tokens.collect();
            debug!(sender = %sender, command = %command, "command received");
            match self.commands.get(command) {
                Some(handler) => handler.handle(self, sender, &args),
                None => self.unicast(None, sender, "Invalid command!"),
            }
        } else {
            self.broadcast(Some(sender), text);
        }
    }

    /// Send `text` to every user in the roster, skipping `sender` when one is
    /// given. A system message (no sender) goes to everyone.
    pub fn broadcast(&self, sender: Option<&str>, text: &str) {
        let roster = self.roster.lock().expect("roster poisoned");
        debug!(sender = ?sender, recipients = roster.len(), "broadcasting");
        for (username, connection) in roster.iter() {
            if sender == Some(username.as_str()) {
                continue;
            }
            let packet = Packet::Message {
                username: sender.map(ToOwned::to_owned),
                text: text.to_owned(),
            };
            // A dying recipient must not take the broadcast down with it.
            if let Err(err) = connection.send(&packet) {
                warn!(username = %username, error = %err, "failed to deliver broadcast");
            }
        }
    }

    /// Send `text` to a single user.
    pub fn unicast(&self, sender: Option<&str>, recipient: &str, text: &str) {
        let roster = self.roster.lock().expect("roster poisoned");
        let Some(connection) = roster.get(recipient) else {
            warn!(recipient = %recipient, "unicast recipient not in the roster");
            return;
        };
        let packet = Packet::Message {
            username: sender.map(ToOwned::to_owned),
            text: text.to_owned(),
        };
        if let Err(err) = connection.send(&packet) {
            warn!(recipient = %recipient, error = %err, "failed to deliver message");
        }
    }

    /// Usernames currently in the roster.
    pub fn usernames(&self) -> Vec<String> {
        self.roster
            .lock()
            .expect("roster poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

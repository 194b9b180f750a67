//! Client application: glue between the UI and the networking layer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::networking::{ClientError, ClientEvent, ClientNetworking};
use crate::ui::ClientUi;

pub struct ClientApplication {
    ui: Arc<dyn ClientUi>,
    networking: Arc<ClientNetworking>,
}

impl ClientApplication {
    pub fn new(ui: Arc<dyn ClientUi>, networking: Arc<ClientNetworking>) -> Self {
        ClientApplication { ui, networking }
    }

    /// Join the server and run until the user quits or the connection dies.
    pub async fn run(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: Option<&str>,
    ) -> Result<(), ClientError> {
        // Bridge both event streams into channels owned by this loop; the
        // subscriptions capture only the senders.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ClientEvent>();
        self.networking
            .events()
            .subscribe(Arc::new(move |event: &ClientEvent| {
                let _ = event_tx.send(event.clone());
            }));

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        self.ui
            .submissions()
            .subscribe(Arc::new(move |line: &String| {
                let _ = line_tx.send(line.clone());
            }));

        let (quit_tx, mut quit_rx) = mpsc::unbounded_channel::<()>();
        self.ui.closed().subscribe(Arc::new(move |_: &()| {
            let _ = quit_tx.send(());
        }));

        if let Err(err) = self.networking.join(host, port, username, password).await {
            self.ui.alert(&format!("Could not join the server: {err}"));
            self.ui.exit(None);
            return Err(err);
        }
        self.ui
            .display_text(&format!("Connected to {host}:{port} as {username}."));

        let mut result = loop {
            tokio::select! {
                Some(event) = event_rx.recv() => match event {
                    ClientEvent::MessageReceived { username, text } => {
                        self.display_message(username.as_deref(), &text);
                    }
                    ClientEvent::ConnectionLost(err) => {
                        self.ui
                            .alert(&format!("Connection to the server was lost: {err}"));
                        break Err(ClientError::Connection(err));
                    }
                },
                Some(line) = line_rx.recv() => {
                    if let Err(err) = self.handle_submission(username, &line).await {
                        break Err(err);
                    }
                }
                Some(()) = quit_rx.recv() => {
                    debug!("user quit");
                    break Ok(());
                }
            }
        };

        if let Err(err) = self.networking.disconnect() {
            if result.is_ok() {
                self.ui.alert(&format!("Could not disconnect cleanly: {err}"));
                result = Err(err);
            } else {
                debug!(error = %err, "disconnect failed during error teardown");
            }
        }
        // The failing branch has already alerted; exit only stops the UI.
        self.ui.exit(None);
        info!("session ended");
        result
    }

    async fn handle_submission(&self, username: &str, line: &str) -> Result<(), ClientError> {
        debug!(line = %line, "sending message");
        match self.networking.send_message(line).await {
            Ok(()) => {
                // Echo the user's own message locally; the server does not
                // send it back to its originator.
                self.display_message(Some(username), line);
                Ok(())
            }
            Err(ClientError::MessageRejected) => {
                self.ui.alert("The message was rejected by the server, sorry.");
                Ok(())
            }
            Err(err) => {
                self.ui.alert(&format!("Could not send the message: {err}"));
                Err(err)
            }
        }
    }

    fn display_message(&self, username: Option<&str>, text: &str) {
        match username {
            None => self.ui.display_text(&format!("**SYSTEM**: {text}")),
            Some(username) => self.ui.display_text(&format!("<{username}>: {text}")),
        }
    }
}

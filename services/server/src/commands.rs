//! Slash-command registry and the built-in commands.
//!
//! The registry is assembled explicitly at startup and handed to the
//! application; there is no global registration.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use rand::Rng;
use tracing::error;

use crate::app::ServerApp;

/// A handler for one slash command.
pub trait CommandHandler: Send + Sync {
    /// Handle `/name arg1 arg2 ...` sent by `sender`.
    fn handle(&self, app: &ServerApp, sender: &str, args: &[&str]);
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry {
            handlers: HashMap::new(),
        }
    }

    /// The built-in command set: `/list` and `/ping`.
    pub fn builtin(pong_corpus: PathBuf) -> Self {
        let mut registry = Self::new();
        registry.register("list", Box::new(ListCommand));
        registry.register("ping", Box::new(PingCommand::new(pong_corpus)));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn CommandHandler> {
        self.handlers.get(name).map(Box::as_ref)
    }
}

/// `/list`: tell the sender who is connected.
pub struct ListCommand;

impl CommandHandler for ListCommand {
    fn handle(&self, app: &ServerApp, sender: &str, _args: &[&str]) {
        let reply = format!("Connected users: {}", app.usernames().join(", "));
        app.unicast(None, sender, &reply);
    }
}

/// `/ping`: answer with a random line from the pong corpus.
pub struct PingCommand {
    corpus: PathBuf,
}

impl PingCommand {
    pub fn new(corpus: impl Into<PathBuf>) -> Self {
        PingCommand {
            corpus: corpus.into(),
        }
    }

    /// Pick one line of the corpus with equal probability in a single pass
    /// (reservoir sampling), so the file never has to fit in memory.
    fn pong_message(&self) -> io::Result<String> {
        let file = File::open(&self.corpus)?;
        let mut rng = rand::thread_rng();
        let mut picked = String::new();
        let mut seen = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            seen += 1;
            if rng.gen_range(0..seen) == 0 {
                picked = line;
            }
        }
        Ok(picked.trim().to_owned())
    }
}

impl CommandHandler for PingCommand {
    fn handle(&self, app: &ServerApp, sender: &str, _args: &[&str]) {
        match self.pong_message() {
            Ok(message) if !message.is_empty() => app.unicast(None, sender, &message),
            Ok(_) => app.unicast(None, sender, "The pong jar is empty, sorry!"),
            Err(err) => {
                error!(path = %self.corpus.display(), error = %err, "failed to read pong corpus");
                app.unicast(None, sender, "The pong jar is empty, sorry!");
            }
        }
    }
}

//! EchoSphere chat server.
//!
//! `networking` accepts connections and drives per-packet dispatch;
//! `app` keeps the roster and routes messages; `commands` is the
//! slash-command registry the application consults.

pub mod app;
pub mod commands;
pub mod logging;
pub mod networking;

pub use app::ServerApp;
pub use commands::{CommandHandler, CommandRegistry};
pub use networking::{ServerError, ServerEvent, ServerNetworking};

//! EchoSphere chat client.
//!
//! `networking` owns the session with the server (login, messages,
//! heartbeats); `app` glues it to a [`ui::ClientUi`] implementation;
//! `console` is the plain terminal UI.

pub mod app;
pub mod console;
pub mod logging;
pub mod networking;
pub mod ui;

pub use app::ClientApplication;
pub use networking::{ClientError, ClientEvent, ClientNetworking};

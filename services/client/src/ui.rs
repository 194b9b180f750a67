//! The user-interface seam consumed by the client application.
//!
//! The application talks to an abstract UI so the networking layer stays
//! renderer-agnostic; [`crate::console`] is the plain terminal
//! implementation.

use chat_protocol::events::Listeners;

pub trait ClientUi: Send + Sync {
    /// Show a prominent notice (errors, rejections).
    fn alert(&self, text: &str);

    /// Prompt the user for one value; `None` means the prompt was cancelled.
    ///
    /// May block the calling thread; run it off the async runtime.
    fn ask_for(&self, prompt: &str, default: Option<&str>) -> Option<String>;

    /// Append one line to the chat transcript.
    fn display_text(&self, text: &str);

    /// Start rendering and accepting input.
    fn draw(&self);

    /// Stop the UI; `err` carries the reason for an abnormal exit.
    fn exit(&self, err: Option<&str>);

    /// Lines the user submitted for sending.
    fn submissions(&self) -> &Listeners<String>;

    /// Fires once when the UI is done accepting input (user quit).
    fn closed(&self) -> &Listeners<()>;
}

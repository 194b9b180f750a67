use thiserror::Error;

/// Errors raised while parsing or building raw packet bytes.
///
/// `IncompleteHeader` is internal to the framing layer ("wait for more
/// bytes"); every other variant is fatal for the stream that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("incomplete packet header: expected at least 4 bytes, got {0}")]
    IncompleteHeader(usize),
    #[error("unknown packet type tag: {0:#04x}")]
    UnknownPacket(u8),
    #[error("invalid packet payload: {0}")]
    InvalidPayload(String),
    #[error("packet reconstruction failed: {0}")]
    BaseProtocol(String),
}

/// Errors surfaced by a live connection.
///
/// Cloneable on purpose: a single failure is fanned out to every pending
/// response waiter and to the `Closed` event, so transport causes are carried
/// as strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("the connection is closed")]
    Closed,
    #[error("network error: {0}")]
    Network(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::Network(err.to_string())
    }
}

/// Returned when unsubscribing a listener id that was never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no listener registered under this id")]
pub struct UnknownListener;

//! EchoSphere chat protocol core.
//!
//! Everything both endpoints share lives here: the packet codec, the framing
//! layer that reassembles packets from a byte stream, the framed connection
//! with FIFO response correlation, typed event dispatch, and the pure field
//! validators.

pub mod codec;
pub mod connection;
pub mod error;
pub mod events;
pub mod packet;
pub mod validators;

pub use connection::{ChatConnection, ConnectionEvent};
pub use error::{ConnectionError, WireError};
pub use packet::{HEADER_SIZE, Packet, PacketType, PROTOCOL_VERSION, ResponseCode};

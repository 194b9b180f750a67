//! Wire representation of chat packets.
//!
//! Every packet is `[version][tag][len_hi][len_lo][payload]`: a fixed 4-byte
//! header with a big-endian payload length, followed by at most
//! `max_payload` bytes for that packet type. Login and Message payloads are
//! UTF-8 with two fields separated by the first `|`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Protocol version carried in the first header byte.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed size of the packet header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Packet type tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Heartbeat = 1,
    Login = 2,
    Message = 3,
    Response = 4,
    Logout = 5,
}

impl PacketType {
    /// Upper bound on the payload size for this packet type.
    pub fn max_payload(self) -> usize {
        match self {
            PacketType::Heartbeat | PacketType::Logout => 0,
            PacketType::Login => 256,
            PacketType::Message => 4096,
            PacketType::Response => 1,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(tag: u8) -> Result<Self, WireError> {
        match tag {
            1 => Ok(PacketType::Heartbeat),
            2 => Ok(PacketType::Login),
            3 => Ok(PacketType::Message),
            4 => Ok(PacketType::Response),
            5 => Ok(PacketType::Logout),
            other => Err(WireError::UnknownPacket(other)),
        }
    }
}

/// Status codes carried by a [`Packet::Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0,
    InvalidUsername = 1,
    TakenUsername = 2,
    InvalidMessage = 3,
    WrongPassword = 4,
    GenericError = 5,
}

impl TryFrom<u8> for ResponseCode {
    type Error = WireError;

    fn try_from(code: u8) -> Result<Self, WireError> {
        match code {
            0 => Ok(ResponseCode::Ok),
            1 => Ok(ResponseCode::InvalidUsername),
            2 => Ok(ResponseCode::TakenUsername),
            3 => Ok(ResponseCode::InvalidMessage),
            4 => Ok(ResponseCode::WrongPassword),
            5 => Ok(ResponseCode::GenericError),
            other => Err(WireError::InvalidPayload(format!(
                "unknown response code: {other}"
            ))),
        }
    }
}

/// A typed chat packet.
///
/// A `Message` with no username is a system message; a `Login` with no
/// password targets an unprotected server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Heartbeat,
    Login {
        username: String,
        password: Option<String>,
    },
    Message {
        username: Option<String>,
        text: String,
    },
    Response(ResponseCode),
    Logout,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Heartbeat => PacketType::Heartbeat,
            Packet::Login { .. } => PacketType::Login,
            Packet::Message { .. } => PacketType::Message,
            Packet::Response(_) => PacketType::Response,
            Packet::Logout => PacketType::Logout,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Packet::Heartbeat | Packet::Logout => Vec::new(),
            Packet::Login { username, password } => {
                format!("{username}|{}", password.as_deref().unwrap_or("")).into_bytes()
            }
            Packet::Message { username, text } => {
                format!("{}|{text}", username.as_deref().unwrap_or("")).into_bytes()
            }
            Packet::Response(code) => vec![*code as u8],
        }
    }

    /// Serialize this packet into its full wire form, header included.
    ///
    /// Fails with [`WireError::InvalidPayload`] when the payload exceeds the
    /// cap for the packet type.
    pub fn serialize(&self) -> Result<Bytes, WireError> {
        let payload = self.payload();
        let packet_type = self.packet_type();
        if payload.len() > packet_type.max_payload() {
            return Err(WireError::InvalidPayload(format!(
                "payload of {} bytes exceeds the {} byte cap for {:?}",
                payload.len(),
                packet_type.max_payload(),
                packet_type
            )));
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(packet_type as u8);
        buf.put_u16(payload.len() as u16);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode `(packet type, payload length)` from the first header bytes.
    pub fn decode_header(raw: &[u8]) -> Result<(PacketType, u16), WireError> {
        if raw.len() < HEADER_SIZE {
            return Err(WireError::IncompleteHeader(raw.len()));
        }
        let packet_type = PacketType::try_from(raw[1])?;
        let payload_len = u16::from_be_bytes([raw[2], raw[3]]);
        Ok((packet_type, payload_len))
    }

    /// Reconstruct a typed packet from a payload of a known type.
    pub fn from_payload(packet_type: PacketType, payload: &[u8]) -> Result<Packet, WireError> {
        if payload.len() > packet_type.max_payload() {
            return Err(WireError::InvalidPayload(format!(
                "payload of {} bytes exceeds the {} byte cap for {:?}",
                payload.len(),
                packet_type.max_payload(),
                packet_type
            )));
        }
        match packet_type {
            PacketType::Heartbeat => Ok(Packet::Heartbeat),
            PacketType::Logout => Ok(Packet::Logout),
            PacketType::Response => {
                let code = payload.first().ok_or_else(|| {
                    WireError::InvalidPayload("response payload is empty".to_owned())
                })?;
                Ok(Packet::Response(ResponseCode::try_from(*code)?))
            }
            PacketType::Login => {
                let (username, password) = split_fields(payload)?;
                Ok(Packet::Login {
                    username: username.to_owned(),
                    password: if password.is_empty() {
                        None
                    } else {
                        Some(password.to_owned())
                    },
                })
            }
            PacketType::Message => {
                let (username, text) = split_fields(payload)?;
                Ok(Packet::Message {
                    username: if username.is_empty() {
                        None
                    } else {
                        Some(username.to_owned())
                    },
                    text: text.to_owned(),
                })
            }
        }
    }
}

/// Split a `field|rest` payload on the first delimiter.
///
/// Splitting on the *first* `|` keeps a message whose text contains the
/// delimiter round-trippable; the username field can never contain one.
fn split_fields(payload: &[u8]) -> Result<(&str, &str), WireError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| WireError::BaseProtocol(format!("payload is not valid UTF-8: {e}")))?;
    text.split_once('|').ok_or_else(|| {
        WireError::InvalidPayload("payload is missing the '|' field delimiter".to_owned())
    })
}

//! Length-prefixed framing over a byte stream.
//!
//! The decoder turns a growing byte buffer into whole packets: nothing is
//! consumed until a full `header + payload` frame is available, so a stream
//! split at any position yields the same packet sequence. Every decode
//! failure other than "not enough bytes yet" is fatal for the stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ConnectionError;
use crate::packet::{HEADER_SIZE, Packet};

/// Framing codec for [`Packet`] values.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ConnectionError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let (packet_type, payload_len) = Packet::decode_header(&src[..HEADER_SIZE])?;
        let frame_len = HEADER_SIZE + payload_len as usize;
        if src.len() < frame_len {
            // Keep the header buffered until the rest of the frame arrives.
            return Ok(None);
        }
        let frame = src.split_to(frame_len);
        let packet = Packet::from_payload(packet_type, &frame[HEADER_SIZE..])?;
        Ok(Some(packet))
    }
}

impl Encoder<&Packet> for PacketCodec {
    type Error = ConnectionError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<(), ConnectionError> {
        dst.extend_from_slice(&packet.serialize()?);
        Ok(())
    }
}

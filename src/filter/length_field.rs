use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Filter, FilterContext};
use crate::{attributes::AttributeKey, error::Error};

pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

const PENDING: AttributeKey<BytesMut> = AttributeKey::new("mill_nio.length_field.pending");

/// A general 4-byte big-endian length-prefixed codec.
///
/// Inbound, it reassembles frames across reads and passes each payload on as
/// one message. Outbound, it prefixes each message with its length.
#[derive(Debug, Clone, Copy)]
pub struct LengthFieldCodec {
    max_frame_length: usize,
}

impl Default for LengthFieldCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl LengthFieldCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, Error> {
        if payload.len() > self.max_frame_length {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds {}",
                payload.len(),
                self.max_frame_length
            )));
        }
        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(payload);
        Ok(frame.freeze())
    }
}

impl Filter for LengthFieldCodec {
    fn name(&self) -> &str {
        "length-field"
    }

    fn on_inbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        let max = self.max_frame_length;
        let mut frames = Vec::new();
        let mut failure = None;
        {
            let pending = ctx.attributes_mut().get_or_insert_with(&PENDING, BytesMut::new);
            pending.extend_from_slice(&message);

            while pending.len() >= HEADER_LEN {
                let length = u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
                if length > max {
                    pending.clear();
                    failure = Some(Error::Protocol(format!(
                        "frame length {length} exceeds {max}"
                    )));
                    break;
                }
                if pending.len() < HEADER_LEN + length {
                    pending.reserve(HEADER_LEN + length - pending.len());
                    break;
                }
                pending.advance(HEADER_LEN);
                frames.push(pending.split_to(length).freeze());
            }
        }

        for frame in frames {
            ctx.pass(frame);
        }
        if let Some(e) = failure {
            ctx.fail(e);
        }
    }

    fn on_outbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        match self.encode(&message) {
            Ok(frame) => ctx.pass(frame),
            Err(e) => ctx.fail(e),
        }
    }

    fn on_closed(&mut self, ctx: &mut FilterContext<'_>) {
        ctx.attributes_mut().remove(&PENDING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attributes::AttributeMap,
        filter::FilterChain,
        session::{Session, TransportType},
    };

    fn chain(max: usize) -> FilterChain {
        FilterChain::builder()
            .add_last(move || LengthFieldCodec::new(max))
            .build()
    }

    #[test]
    fn test_encode_prefixes_length() {
        let codec = LengthFieldCodec::default();
        assert_eq!(&codec.encode(b"abc").unwrap()[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
        assert!(LengthFieldCodec::new(2).encode(b"abc").is_err());
    }

    #[test]
    fn test_reassembles_split_frames() {
        let mut chain = chain(1024);
        let session = Session::detached(TransportType::Stream);
        let mut attributes = AttributeMap::default();

        let out = chain.fire_inbound(&session, &mut attributes, Bytes::from_static(&[0, 0, 0, 5, b'h', b'e']));
        assert!(out.delivered.is_empty());

        let out = chain.fire_inbound(
            &session,
            &mut attributes,
            Bytes::from_static(&[b'l', b'l', b'o', 0, 0, 0, 0, 0, 0]),
        );
        assert_eq!(out.delivered, vec![Bytes::from_static(b"hello"), Bytes::new()]);

        let out = chain.fire_inbound(&session, &mut attributes, Bytes::from_static(&[0, 1, b'!']));
        assert_eq!(out.delivered, vec![Bytes::from_static(b"!")]);
    }

    #[test]
    fn test_outbound_encodes() {
        let mut chain = chain(1024);
        let session = Session::detached(TransportType::Stream);
        let mut attributes = AttributeMap::default();

        let out = chain.fire_outbound(&session, &mut attributes, Bytes::from_static(b"hi"));
        assert_eq!(out.transmit, vec![Bytes::from_static(&[0, 0, 0, 2, b'h', b'i'])]);
    }

    #[test]
    fn test_oversized_frame_fails() {
        let mut chain = chain(4);
        let session = Session::detached(TransportType::Stream);
        let mut attributes = AttributeMap::default();

        let out = chain.fire_inbound(&session, &mut attributes, Bytes::from_static(&[0, 0, 0, 9]));
        assert!(matches!(out.failure, Some(Error::Protocol(_))));

        let out = chain.fire_outbound(&session, &mut attributes, Bytes::from_static(b"too long"));
        assert!(matches!(out.failure, Some(Error::Protocol(_))));
        assert!(out.transmit.is_empty());
    }
}

//! The acknowledging length-prefixed framing decoder.
//!
//! A request frame is a 4-byte big-endian length `L` followed by exactly `L`
//! payload bytes. The decoder answers every completed frame, including an
//! empty one, with a single `0x00` byte and discards the payload.
//!
//! ```text
//!  WaitLength0 ─▶ WaitLength1 ─▶ WaitLength2 ─▶ WaitLength3 ─┬─▶ ReadingPayload ─┐
//!       ▲                                                    │ L == 0           │ remaining == 0
//!       └─────────────────────── ack 0x00 ◀──────────────────┴──────────────────┘
//! ```
//!
//! The wait-state and the remaining-length counter live in the session's
//! attributes, so the decoder picks up exactly where the previous chunk left
//! it, whatever the chunk boundaries were.

use bytes::Bytes;

use super::{Filter, FilterContext};
use crate::{
    attributes::{AttributeKey, AttributeMap},
    error::{Error, Result},
};

/// Position of the decoder within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeState {
    #[default]
    WaitLength0,
    WaitLength1,
    WaitLength2,
    WaitLength3,
    ReadingPayload,
}

pub const DECODE_STATE: AttributeKey<DecodeState> = AttributeKey::new("mill_nio.framing.state");
/// Length bytes accumulated so far, then payload bytes still expected.
pub const REMAINING_LENGTH: AttributeKey<u32> = AttributeKey::new("mill_nio.framing.remaining");

/// Largest accepted frame length, 2^31 − 1.
pub const MAX_FRAME_LENGTH: u32 = i32::MAX as u32;

/// The acknowledgment sent for every completed frame.
pub static ACK: Bytes = Bytes::from_static(&[0]);

/// Decodes ack-framed requests and answers each with [`ACK`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AckFramingFilter;

impl AckFramingFilter {
    /// Feeds `chunk` to the decoder whose state is kept in `attributes` and
    /// returns how many frames it completed.
    ///
    /// A length above [`MAX_FRAME_LENGTH`] is an [`Error::Protocol`]; the decoder
    /// is reset so the state never holds a half-read bogus frame.
    pub fn decode(attributes: &mut AttributeMap, chunk: &[u8]) -> Result<usize> {
        let mut state = attributes.get(&DECODE_STATE).copied().unwrap_or_default();
        let mut length = attributes.get(&REMAINING_LENGTH).copied().unwrap_or(0);
        let mut acks = 0;
        let mut rest = chunk;

        while !rest.is_empty() {
            match state {
                DecodeState::WaitLength0 => {
                    length = u32::from(rest[0]) << 24;
                    rest = &rest[1..];
                    state = DecodeState::WaitLength1;
                }
                DecodeState::WaitLength1 => {
                    length |= u32::from(rest[0]) << 16;
                    rest = &rest[1..];
                    state = DecodeState::WaitLength2;
                }
                DecodeState::WaitLength2 => {
                    length |= u32::from(rest[0]) << 8;
                    rest = &rest[1..];
                    state = DecodeState::WaitLength3;
                }
                DecodeState::WaitLength3 => {
                    length |= u32::from(rest[0]);
                    rest = &rest[1..];

                    if length > MAX_FRAME_LENGTH {
                        attributes.insert(&DECODE_STATE, DecodeState::WaitLength0);
                        attributes.insert(&REMAINING_LENGTH, 0);
                        return Err(Error::Protocol(format!(
                            "frame length {length} exceeds {MAX_FRAME_LENGTH}"
                        )));
                    }
                    if length == 0 {
                        acks += 1;
                        state = DecodeState::WaitLength0;
                    } else {
                        state = DecodeState::ReadingPayload;
                    }
                }
                DecodeState::ReadingPayload => {
                    let available = rest.len().min(length as usize);
                    rest = &rest[available..];
                    length -= available as u32;
                    if length == 0 {
                        acks += 1;
                        state = DecodeState::WaitLength0;
                    }
                }
            }
        }

        attributes.insert(&DECODE_STATE, state);
        attributes.insert(&REMAINING_LENGTH, length);
        Ok(acks)
    }
}

impl Filter for AckFramingFilter {
    fn name(&self) -> &str {
        "ack-framing"
    }

    fn on_inbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        match Self::decode(ctx.attributes_mut(), &message) {
            Ok(acks) => {
                for _ in 0..acks {
                    ctx.write(ACK.clone());
                }
            }
            Err(e) => ctx.fail(e),
        }
    }
}

//! Application frames and the payload decoder.
//!
//! A payload is `16 + 3 * N` bytes:
//!
//! ```text
//! [ secs: i64 LE ][ nanos: i64 LE ][ r g b ][ r g b ] ... N pixels
//! ```
//!
//! The parser feeds the decoder one byte at a time, at the byte's offset
//! into the payload, so a frame can be assembled across any number of
//! socket reads without copying the payload into a staging buffer first.

use crate::Color;
use std::time::Duration;

/// Bytes of deadline before the first pixel.
pub const DEADLINE_LEN: usize = 16;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A wall-clock instant as seconds and nanoseconds since the Unix epoch.
///
/// Both fields come straight off the wire, so `nanos` is not required to be
/// below one second; arithmetic always combines the two.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: i64,
}

impl Timestamp {
    pub const fn new(secs: i64, nanos: i64) -> Self {
        Self { secs, nanos }
    }

    /// Nanoseconds since the epoch, combining both fields.
    pub fn as_nanos(&self) -> i128 {
        self.secs as i128 * NANOS_PER_SEC + self.nanos as i128
    }

    /// Signed nanoseconds from `earlier` to `self`; negative when `self`
    /// is the earlier of the two.
    pub fn nanos_since(&self, earlier: Timestamp) -> i128 {
        self.as_nanos() - earlier.as_nanos()
    }

    /// `self` shifted forward by `by`.
    pub fn after(&self, by: Duration) -> Self {
        let total = self.as_nanos() + by.as_nanos() as i128;
        Self {
            secs: total.div_euclid(NANOS_PER_SEC) as i64,
            nanos: total.rem_euclid(NANOS_PER_SEC) as i64,
        }
    }
}

/// One decoded unit of work: a render deadline plus a full pixel buffer.
///
/// Frames are never mutated after decoding; the fields are read-only
/// through accessors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    deadline: Timestamp,
    pixels: Box<[Color]>,
}

impl Frame {
    pub fn new(deadline: Timestamp, pixels: impl Into<Box<[Color]>>) -> Self {
        Self {
            deadline,
            pixels: pixels.into(),
        }
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// Wire encoding of this frame, used by tests and tooling that publish
    /// frames.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DEADLINE_LEN + self.pixels.len() * 3);
        out.extend_from_slice(&self.deadline.secs.to_le_bytes());
        out.extend_from_slice(&self.deadline.nanos.to_le_bytes());
        for p in self.pixels.iter() {
            out.extend_from_slice(&[p.r, p.g, p.b]);
        }
        out
    }
}

/// Scratch space for the frame currently being received.
#[derive(Debug)]
pub struct FrameDecoder {
    secs: [u8; 8],
    nanos: [u8; 8],
    pixels: Vec<Color>,
}

impl FrameDecoder {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            secs: [0; 8],
            nanos: [0; 8],
            pixels: vec![Color::BLACK; pixel_count],
        }
    }

    /// Exact payload length this decoder accepts.
    pub fn payload_len(&self) -> usize {
        DEADLINE_LEN + self.pixels.len() * 3
    }

    /// Store the payload byte found at `offset`.
    ///
    /// Offsets at or past [`payload_len`](Self::payload_len) are ignored;
    /// the parser never produces them.
    pub fn accept(&mut self, offset: usize, byte: u8) {
        match offset {
            0..8 => self.secs[offset] = byte,
            8..DEADLINE_LEN => self.nanos[offset - 8] = byte,
            _ => {
                let index = offset - DEADLINE_LEN;
                let Some(pixel) = self.pixels.get_mut(index / 3) else {
                    return;
                };
                match index % 3 {
                    0 => pixel.r = byte,
                    1 => pixel.g = byte,
                    _ => pixel.b = byte,
                }
            }
        }
    }

    /// Hand out the assembled frame and reset the scratch buffer.
    pub fn finish(&mut self) -> Frame {
        let deadline = Timestamp::new(
            i64::from_le_bytes(self.secs),
            i64::from_le_bytes(self.nanos),
        );
        let len = self.pixels.len();
        let pixels = std::mem::replace(&mut self.pixels, vec![Color::BLACK; len]);
        self.secs = [0; 8];
        self.nanos = [0; 8];
        Frame::new(deadline, pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn decode(payload: &[u8], pixel_count: usize) -> Frame {
        let mut decoder = FrameDecoder::new(pixel_count);
        assert_eq!(decoder.payload_len(), payload.len());
        for (offset, &byte) in payload.iter().enumerate() {
            decoder.accept(offset, byte);
        }
        decoder.finish()
    }

    #[test]
    fn decodes_deadline_then_pixel_triples() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_700_000_000i64.to_le_bytes());
        payload.extend_from_slice(&250_000_000i64.to_le_bytes());
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

        let frame = decode(&payload, 2);
        assert_eq!(frame.deadline(), Timestamp::new(1_700_000_000, 250_000_000));
        assert_eq!(frame.pixels(), &[Color::new(1, 2, 3), Color::new(4, 5, 6)]);
    }

    #[test]
    fn decodes_negative_fields_as_twos_complement() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-1i64).to_le_bytes());
        payload.extend_from_slice(&(-5i64).to_le_bytes());
        payload.extend_from_slice(&[9, 9, 9]);

        assert_eq!(decode(&payload, 1).deadline(), Timestamp::new(-1, -5));
    }

    #[test]
    fn finish_resets_scratch() {
        let frame = Frame::new(Timestamp::new(5, 6), vec![Color::new(7, 8, 9)]);
        let mut decoder = FrameDecoder::new(1);
        for (offset, byte) in frame.to_payload().into_iter().enumerate() {
            decoder.accept(offset, byte);
        }
        assert_eq!(decoder.finish(), frame);

        let empty = decoder.finish();
        assert_eq!(empty.deadline(), Timestamp::default());
        assert_eq!(empty.pixels(), &[Color::BLACK]);
    }

    #[test]
    fn payload_of_49_pixels_is_163_bytes() {
        assert_eq!(FrameDecoder::new(49).payload_len(), 163);
    }

    #[rstest]
    #[case(Timestamp::new(10, 0), Timestamp::new(9, 500_000_000), 500_000_000)]
    #[case(Timestamp::new(9, 500_000_000), Timestamp::new(10, 0), -500_000_000)]
    #[case(Timestamp::new(10, 0), Timestamp::new(10, 0), 0)]
    #[case(Timestamp::new(0, 2_000_000_000), Timestamp::new(1, 0), 1_000_000_000)]
    fn nanos_since_combines_fields(#[case] later: Timestamp, #[case] earlier: Timestamp, #[case] expected: i128) {
        assert_eq!(later.nanos_since(earlier), expected);
    }

    #[test]
    fn after_carries_into_seconds() {
        let t = Timestamp::new(1, 900_000_000).after(Duration::from_millis(200));
        assert_eq!(t, Timestamp::new(2, 100_000_000));
    }
}

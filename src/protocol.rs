//! Resumable NATS client parser for a single subscription.
//!
//! The parser is an explicit state value plus a transition function keyed
//! on `(state, byte)`. It consumes exactly one byte per transition and never
//! looks back, so a socket read may end anywhere (mid-literal, mid-payload,
//! between CR and LF) and the next read simply continues.
//!
//! ```text
//!  AwaitDial ──INFO {..}\r\n──▶ AwaitAck ──+OK\r\n──▶ Idle ◀──────────────┐
//!                                                    │                   │
//!            ┌───────────────┬───────────────────────┤                   │
//!            ▼ 'I'           ▼ 'P'                   ▼ 'M'               │
//!          InInfo          InPing           InMessageHeader              │
//!            │               │ (PONG reply)          │ \r\n              │
//!            │               │                       ▼                   │
//!            │               │                   InPayload ─▶ InPayloadTrailer
//!            └───────────────┴───────────────────────┴───────────────────┘
//!
//!  any unexpected byte ──▶ ErrorRecovery ──'I' / 'M' / 'P'──▶ verb states
//! ```
//!
//! Outputs are reported through a callback as [`Event`]s; the parser itself
//! never performs I/O.

use crate::config::Subscription;
use crate::frame::{Frame, FrameDecoder};
use std::fmt;

/// The keepalive reply.
pub const PONG: &[u8] = b"PONG\r\n";

const INFO_OPEN: &[u8] = b"INFO {";
const OK_LINE: &[u8] = b"+OK\r\n";
const PING_LINE: &[u8] = b"PING\r\n";
const CRLF: &[u8] = b"\r\n";

/// Most digits accepted in a `MSG` byte count.
const MAX_COUNT_DIGITS: u8 = 10;

// ── States ───────────────────────────────────────────────────────────

/// Where the parser is inside the byte stream.
///
/// `matched` counters always index into a fixed literal; the bytes before
/// that index are known to have matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the server greeting; `matched` bytes of `INFO` seen.
    AwaitDial { matched: usize },
    /// Subscription sent; `matched` bytes of `+OK\r\n` seen.
    AwaitAck { matched: usize },
    /// Between frames.
    Idle,
    /// Inside `MSG <topic> <sid> <count>\r\n`.
    InMessageHeader(HeaderProgress),
    /// `consumed` payload bytes handed to the decoder.
    InPayload { consumed: usize },
    /// Payload complete; `matched` bytes of the trailing CRLF seen.
    InPayloadTrailer { matched: usize },
    /// Inside `PING\r\n` or `PONG\r\n`.
    InPing { keepalive: Keepalive, matched: usize },
    /// Inside `INFO {...}\r\n`.
    InInfo(InfoProgress),
    /// Discarding input until a verb starts.
    ErrorRecovery,
}

/// Progress through a `MSG` header line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderProgress {
    /// `matched` bytes of `MSG <topic> <sid> ` seen.
    Prefix { matched: usize },
    /// Reading the decimal byte count.
    Count { value: u64, digits: u8 },
    /// CR after the count seen, expecting LF.
    LineFeed { value: u64 },
}

/// Progress through an `INFO` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoProgress {
    /// `matched` bytes of `INFO {` seen.
    Prefix { matched: usize },
    /// Skipping the object up to the first `}`.
    Object,
    /// `}` seen; a single space or the CR may follow.
    Closed,
    /// `} ` seen; expecting CR.
    Spaced,
    /// CR seen; expecting LF.
    LineFeed,
}

/// The two keepalive verbs share their first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keepalive {
    /// Only the `P` has been seen.
    Undecided,
    Ping,
    Pong,
}

impl Keepalive {
    fn literal(self) -> &'static [u8] {
        match self {
            Keepalive::Pong => PONG,
            Keepalive::Ping | Keepalive::Undecided => PING_LINE,
        }
    }
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParserState::AwaitDial { .. } => "await-dial",
            ParserState::AwaitAck { .. } => "await-ack",
            ParserState::Idle => "idle",
            ParserState::InMessageHeader(_) => "msg-header",
            ParserState::InPayload { .. } => "payload",
            ParserState::InPayloadTrailer { .. } => "payload-trailer",
            ParserState::InPing { .. } => "ping",
            ParserState::InInfo(_) => "info",
            ParserState::ErrorRecovery => "error-recovery",
        };
        f.write_str(name)
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// Effects produced while feeding bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// Write the subscription's `SUB` line.
    Subscribe,
    /// Write [`PONG`].
    Pong,
    /// A payload completed with its trailing CRLF.
    Frame(Frame),
}

// ── Parser ───────────────────────────────────────────────────────────

/// Stream parser for one subscription.
pub struct Parser {
    state: ParserState,
    msg_prefix: Vec<u8>,
    payload_len: usize,
    decoder: FrameDecoder,
    subscribed: bool,
    /// Set from the first bad byte until the next complete frame, so one
    /// burst of garbage produces one diagnostic.
    resyncing: bool,
    errors: u64,
}

impl Parser {
    pub fn new(subscription: &Subscription, pixel_count: usize) -> Self {
        let decoder = FrameDecoder::new(pixel_count);
        Self {
            state: ParserState::AwaitDial { matched: 0 },
            msg_prefix: subscription.msg_prefix(),
            payload_len: decoder.payload_len(),
            decoder,
            subscribed: false,
            resyncing: false,
            errors: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Error episodes seen so far.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Payload length a `MSG` must declare.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Run every byte of `bytes` through the state machine.
    pub fn feed(&mut self, bytes: &[u8], mut on_event: impl FnMut(Event)) {
        for &byte in bytes {
            if let Some(event) = self.step(byte) {
                on_event(event);
            }
        }
    }

    /// Single transition.
    pub fn step(&mut self, byte: u8) -> Option<Event> {
        let (next, event) = self.transition(self.state, byte);
        self.state = next;
        event
    }

    fn transition(&mut self, state: ParserState, byte: u8) -> (ParserState, Option<Event>) {
        use ParserState::*;

        match state {
            AwaitDial { matched } => match advance(INFO_OPEN, matched, byte) {
                // The greeting and a re-sent INFO share the body states.
                Some(matched) if matched == 4 => (InInfo(InfoProgress::Prefix { matched }), None),
                Some(matched) => (AwaitDial { matched }, None),
                None => (self.reject(state, byte), None),
            },

            AwaitAck { matched } => match advance(OK_LINE, matched, byte) {
                Some(matched) if matched == OK_LINE.len() => {
                    tracing::debug!("subscription acknowledged");
                    (self.complete(), None)
                }
                Some(matched) => (AwaitAck { matched }, None),
                None => (self.reject(state, byte), None),
            },

            Idle => match verb_start(byte) {
                Some(next) => (next, None),
                None => (self.reject(state, byte), None),
            },

            ErrorRecovery => (verb_start(byte).unwrap_or(ErrorRecovery), None),

            InInfo(progress) => self.info(progress, byte),

            InPing { keepalive, matched } => self.keepalive(keepalive, matched, byte),

            InMessageHeader(progress) => (self.header(progress, byte), None),

            InPayload { consumed } => {
                self.decoder.accept(consumed, byte);
                let consumed = consumed + 1;
                if consumed == self.payload_len {
                    (InPayloadTrailer { matched: 0 }, None)
                } else {
                    (InPayload { consumed }, None)
                }
            }

            InPayloadTrailer { matched } => match advance(CRLF, matched, byte) {
                Some(2) => {
                    let frame = self.decoder.finish();
                    tracing::trace!(deadline = ?frame.deadline(), "frame decoded");
                    (self.complete(), Some(Event::Frame(frame)))
                }
                Some(matched) => (InPayloadTrailer { matched }, None),
                None => (self.reject(state, byte), None),
            },
        }
    }

    fn info(&mut self, progress: InfoProgress, byte: u8) -> (ParserState, Option<Event>) {
        let state = ParserState::InInfo(progress);
        let next = match (progress, byte) {
            (InfoProgress::Prefix { matched }, _) => match advance(INFO_OPEN, matched, byte) {
                Some(matched) if matched == INFO_OPEN.len() => InfoProgress::Object,
                Some(matched) => InfoProgress::Prefix { matched },
                None => return (self.reject(state, byte), None),
            },
            (InfoProgress::Object, b'}') => InfoProgress::Closed,
            (InfoProgress::Object, _) => InfoProgress::Object,
            (InfoProgress::Closed, b' ') => InfoProgress::Spaced,
            (InfoProgress::Closed | InfoProgress::Spaced, b'\r') => InfoProgress::LineFeed,
            (InfoProgress::LineFeed, b'\n') => {
                if self.subscribed {
                    tracing::debug!("server info updated");
                    return (self.complete(), None);
                }
                tracing::info!("greeting received, subscribing");
                self.subscribed = true;
                self.resyncing = false;
                return (ParserState::AwaitAck { matched: 0 }, Some(Event::Subscribe));
            }
            _ => return (self.reject(state, byte), None),
        };
        (ParserState::InInfo(next), None)
    }

    fn keepalive(&mut self, keepalive: Keepalive, matched: usize, byte: u8) -> (ParserState, Option<Event>) {
        let state = ParserState::InPing { keepalive, matched };
        let keepalive = match (keepalive, matched, byte) {
            (Keepalive::Undecided, 1, b'I') => Keepalive::Ping,
            (Keepalive::Undecided, 1, b'O') => Keepalive::Pong,
            (Keepalive::Undecided, _, _) => return (self.reject(state, byte), None),
            (decided, _, _) => decided,
        };
        let literal = keepalive.literal();
        match advance(literal, matched, byte) {
            Some(matched) if matched == literal.len() => {
                let event = match keepalive {
                    Keepalive::Ping => {
                        tracing::debug!("PING");
                        Some(Event::Pong)
                    }
                    _ => None,
                };
                (self.complete(), event)
            }
            Some(matched) => (ParserState::InPing { keepalive, matched }, None),
            None => (self.reject(state, byte), None),
        }
    }

    fn header(&mut self, progress: HeaderProgress, byte: u8) -> ParserState {
        let state = ParserState::InMessageHeader(progress);
        let next = match progress {
            HeaderProgress::Prefix { matched } => match advance(&self.msg_prefix, matched, byte) {
                Some(matched) if matched == self.msg_prefix.len() => {
                    HeaderProgress::Count { value: 0, digits: 0 }
                }
                Some(matched) => HeaderProgress::Prefix { matched },
                None => return self.reject(state, byte),
            },
            HeaderProgress::Count { value, digits } => match byte {
                b'0'..=b'9' if digits < MAX_COUNT_DIGITS => HeaderProgress::Count {
                    value: value * 10 + u64::from(byte - b'0'),
                    digits: digits + 1,
                },
                b'\r' if digits > 0 => HeaderProgress::LineFeed { value },
                _ => return self.reject(state, byte),
            },
            HeaderProgress::LineFeed { value } => {
                if byte != b'\n' {
                    return self.reject(state, byte);
                }
                if value != self.payload_len as u64 {
                    return self.reject_length(value);
                }
                return ParserState::InPayload { consumed: 0 };
            }
        };
        ParserState::InMessageHeader(next)
    }

    /// A frame or control line finished cleanly.
    fn complete(&mut self) -> ParserState {
        self.resyncing = false;
        ParserState::Idle
    }

    /// The offending byte may itself start the next verb (`PPING`).
    fn reject(&mut self, state: ParserState, byte: u8) -> ParserState {
        if !self.resyncing {
            tracing::warn!(
                state = %state,
                byte = ?(byte as char),
                "unexpected byte 0x{byte:02x}, resynchronizing"
            );
        }
        let recovery = self.enter_recovery();
        verb_start(byte).unwrap_or(recovery)
    }

    fn reject_length(&mut self, declared: u64) -> ParserState {
        if !self.resyncing {
            tracing::warn!(
                declared,
                expected = self.payload_len,
                "message has unexpected payload length, resynchronizing"
            );
        }
        self.enter_recovery()
    }

    fn enter_recovery(&mut self) -> ParserState {
        if !self.resyncing {
            self.errors += 1;
            self.resyncing = true;
        }
        ParserState::ErrorRecovery
    }
}

/// Match `byte` against `literal[matched]`, returning the new match count.
fn advance(literal: &[u8], matched: usize, byte: u8) -> Option<usize> {
    (literal.get(matched) == Some(&byte)).then_some(matched + 1)
}

/// The state entered when `byte` can start a verb.
fn verb_start(byte: u8) -> Option<ParserState> {
    match byte {
        b'I' => Some(ParserState::InInfo(InfoProgress::Prefix { matched: 1 })),
        b'M' => Some(ParserState::InMessageHeader(HeaderProgress::Prefix { matched: 1 })),
        b'P' => Some(ParserState::InPing {
            keepalive: Keepalive::Undecided,
            matched: 1,
        }),
        _ => None,
    }
}

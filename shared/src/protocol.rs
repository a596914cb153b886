//! Wire protocol for lockstep sessions
//!
//! Every message is a one-byte id followed by a fixed-layout payload in
//! network byte order. Variable-length parts carry an explicit `i32` count;
//! there is no outer length frame, so a stream is decoded by walking the
//! layout of each message in turn.
//!
//! | id | message                  | payload                                                   |
//! |----|--------------------------|-----------------------------------------------------------|
//! | 1  | `StartSession`           | n:i32, roster:i32×n, tick_rate:i32, latency:i32, id:i32   |
//! | 2  | `ClientTickSubmit`       | input, tick:i32, hash:u64                                 |
//! | 3  | `ConfirmedTickBroadcast` | n:i32, ids:i32×n, inputs×n, tick:i32, desynced:u8         |
//! | 4  | `DesyncNotice`           | none                                                      |
//!
//! Application inputs are written with fixed-int, big-endian bincode options
//! so a struct of fixed-size fields always has the same encoded size.

use crate::error::ProtocolError;
use crate::{ConfirmedTickPayload, NetworkId, Tick, TickInput, TickRateConfig};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Cursor, ErrorKind};
use std::marker::PhantomData;

pub const START_SESSION: u8 = 1;
pub const CLIENT_TICK_SUBMIT: u8 = 2;
pub const CONFIRMED_TICK_BROADCAST: u8 = 3;
pub const DESYNC_NOTICE: u8 = 4;

/// Upper bound on any count field; protects the decoder from absurd lengths.
pub const MAX_ROSTER_SIZE: usize = 1024;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Sent once to each peer when the session starts, carrying that peer's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSession {
    pub roster: Vec<NetworkId>,
    pub tick_rate: u16,
    pub forced_latency_ticks: u32,
    pub this_peer_id: NetworkId,
}

impl StartSession {
    /// Fixed-step parameters for the client; the frame guard is local config.
    pub fn tick_rate_config(&self, max_ticks_per_frame: u32) -> TickRateConfig {
        TickRateConfig {
            tick_rate: self.tick_rate,
            forced_latency_ticks: self.forced_latency_ticks,
            max_ticks_per_frame,
        }
    }
}

/// A client's input for one tick plus its state hash at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientTickSubmit<I> {
    pub input: I,
    pub tick: Tick,
    pub hash: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message<I> {
    StartSession(StartSession),
    ClientTickSubmit(ClientTickSubmit<I>),
    ConfirmedTickBroadcast(ConfirmedTickPayload<I>),
    DesyncNotice,
}

impl<I: TickInput> Message<I> {
    pub fn id(&self) -> u8 {
        match self {
            Message::StartSession(_) => START_SESSION,
            Message::ClientTickSubmit(_) => CLIENT_TICK_SUBMIT,
            Message::ConfirmedTickBroadcast(_) => CONFIRMED_TICK_BROADCAST,
            Message::DesyncNotice => DESYNC_NOTICE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::StartSession(_) => "StartSession",
            Message::ClientTickSubmit(_) => "ClientTickSubmit",
            Message::ConfirmedTickBroadcast(_) => "ConfirmedTickBroadcast",
            Message::DesyncNotice => "DesyncNotice",
        }
    }

    /// Appends the encoded message to `buf`.
    ///
    /// On error `buf` may hold a partially written message and should be
    /// discarded.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let mut w = WireWriter { buf };
        w.put_u8(self.id())?;

        match self {
            Message::StartSession(start) => {
                w.put_count("roster.length", start.roster.len())?;
                for id in &start.roster {
                    w.put_u32("roster", *id)?;
                }
                w.put_u32("tick_rate", start.tick_rate as u32)?;
                w.put_u32("forced_latency_ticks", start.forced_latency_ticks)?;
                w.put_u32("this_peer_id", start.this_peer_id)?;
            }
            Message::ClientTickSubmit(submit) => {
                w.put(&submit.input)?;
                w.put_u32("tick", submit.tick)?;
                w.put(&submit.hash)?;
            }
            Message::ConfirmedTickBroadcast(payload) => {
                if payload.inputs.len() != payload.network_ids.len() {
                    return Err(ProtocolError::FieldOutOfRange {
                        field: "inputs.length",
                        value: payload.inputs.len() as i64,
                    });
                }
                w.put_count("roster.length", payload.network_ids.len())?;
                for id in &payload.network_ids {
                    w.put_u32("network_ids", *id)?;
                }
                for input in &payload.inputs {
                    w.put(input)?;
                }
                w.put_u32("tick", payload.tick)?;
                w.put_u8(payload.desynced as u8)?;
            }
            Message::DesyncNotice => {}
        }

        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(32);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one message from the front of `buf`.
    ///
    /// Returns the message and the number of bytes it occupied, or
    /// [`ProtocolError::Incomplete`] if `buf` ends before the message does.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let mut r = WireReader {
            cursor: Cursor::new(buf),
        };

        let message = match r.get::<u8>()? {
            START_SESSION => {
                let count = r.get_count("roster.length")?;
                let mut roster = Vec::with_capacity(count);
                for _ in 0..count {
                    roster.push(r.get_u32("roster")?);
                }
                let tick_rate = r.get_u32("tick_rate")?;
                let tick_rate =
                    u16::try_from(tick_rate).map_err(|_| ProtocolError::FieldOutOfRange {
                        field: "tick_rate",
                        value: tick_rate as i64,
                    })?;
                Message::StartSession(StartSession {
                    roster,
                    tick_rate,
                    forced_latency_ticks: r.get_u32("forced_latency_ticks")?,
                    this_peer_id: r.get_u32("this_peer_id")?,
                })
            }
            CLIENT_TICK_SUBMIT => {
                let input = r.get::<I>()?;
                let tick = r.get_u32("tick")?;
                let hash = r.get::<u64>()?;
                Message::ClientTickSubmit(ClientTickSubmit { input, tick, hash })
            }
            CONFIRMED_TICK_BROADCAST => {
                let count = r.get_count("roster.length")?;
                let mut network_ids = Vec::with_capacity(count);
                for _ in 0..count {
                    network_ids.push(r.get_u32("network_ids")?);
                }
                let mut inputs = Vec::with_capacity(count);
                for _ in 0..count {
                    inputs.push(r.get::<I>()?);
                }
                let tick = r.get_u32("tick")?;
                let desynced = match r.get::<u8>()? {
                    0 => false,
                    1 => true,
                    other => return Err(ProtocolError::InvalidFlag(other)),
                };
                Message::ConfirmedTickBroadcast(ConfirmedTickPayload {
                    tick,
                    network_ids,
                    inputs,
                    desynced,
                })
            }
            DESYNC_NOTICE => Message::DesyncNotice,
            other => return Err(ProtocolError::UnknownMessageId(other)),
        };

        Ok((message, r.cursor.position() as usize))
    }

    /// Length of the message at the front of `buf`, read from its id and
    /// count fields alone.
    ///
    /// Inputs are assumed fixed-size, so this holds even when the body
    /// itself is malformed.
    pub fn frame_len(buf: &[u8]) -> Result<usize, ProtocolError> {
        let mut r = WireReader {
            cursor: Cursor::new(buf),
        };
        let input = wire_options().serialized_size(&I::default())? as usize;

        let len = match r.get::<u8>()? {
            START_SESSION => 1 + 4 + 4 * r.get_count("roster.length")? + 12,
            CLIENT_TICK_SUBMIT => 1 + input + 4 + 8,
            CONFIRMED_TICK_BROADCAST => {
                let count = r.get_count("roster.length")?;
                1 + 4 + count * (4 + input) + 4 + 1
            }
            DESYNC_NOTICE => 1,
            other => return Err(ProtocolError::UnknownMessageId(other)),
        };
        Ok(len)
    }
}

struct WireWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl WireWriter<'_> {
    fn put<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        wire_options().serialize_into(&mut *self.buf, value)?;
        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.put(&value)
    }

    /// Ids, ticks and rates travel as non-negative `i32`.
    fn put_u32(&mut self, field: &'static str, value: u32) -> Result<(), ProtocolError> {
        let value = i32::try_from(value).map_err(|_| ProtocolError::FieldOutOfRange {
            field,
            value: value as i64,
        })?;
        self.put(&value)
    }

    fn put_count(&mut self, field: &'static str, count: usize) -> Result<(), ProtocolError> {
        if count > MAX_ROSTER_SIZE {
            return Err(ProtocolError::FieldOutOfRange {
                field,
                value: count as i64,
            });
        }
        self.put(&(count as i32))
    }
}

struct WireReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl WireReader<'_> {
    fn get<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        wire_options()
            .deserialize_from(&mut self.cursor)
            .map_err(|err| {
                if let bincode::ErrorKind::Io(io) = err.as_ref() {
                    if io.kind() == ErrorKind::UnexpectedEof {
                        return ProtocolError::Incomplete;
                    }
                }
                ProtocolError::Payload(err)
            })
    }

    fn get_u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        let value = self.get::<i32>()?;
        u32::try_from(value).map_err(|_| ProtocolError::FieldOutOfRange {
            field,
            value: value as i64,
        })
    }

    fn get_count(&mut self, field: &'static str) -> Result<usize, ProtocolError> {
        let count = self.get_u32(field)? as usize;
        if count > MAX_ROSTER_SIZE {
            return Err(ProtocolError::FieldOutOfRange {
                field,
                value: count as i64,
            });
        }
        Ok(count)
    }
}

/// Reassembles messages from a reliable, ordered byte stream.
///
/// Bytes are appended as they arrive; complete messages are taken from the
/// front. A message with a known id but a malformed body is dropped whole;
/// an unknown id or an unreadable count costs one byte. Either way the
/// connection stays up.
pub struct FrameDecoder<I> {
    buffer: Vec<u8>,
    _input: PhantomData<fn() -> I>,
}

impl<I: TickInput> FrameDecoder<I> {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(2048),
            _input: PhantomData,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete message, `None` when more bytes are needed.
    pub fn next_message(&mut self) -> Option<Result<Message<I>, ProtocolError>> {
        if self.buffer.is_empty() {
            return None;
        }

        match Message::decode(&self.buffer) {
            Ok((message, used)) => {
                self.buffer.drain(..used);
                Some(Ok(message))
            }
            Err(ProtocolError::Incomplete) => None,
            Err(err) => match Message::<I>::frame_len(&self.buffer) {
                // Wait for the rest so the bad message goes in one piece
                Ok(len) if len > self.buffer.len() => None,
                Ok(len) => {
                    self.buffer.drain(..len);
                    Some(Err(err))
                }
                Err(_) => {
                    self.buffer.drain(..1);
                    Some(Err(err))
                }
            },
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<I: TickInput> Default for FrameDecoder<I> {
    fn default() -> Self {
        Self::new()
    }
}

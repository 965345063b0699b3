//! Tag-prefixed binary framing for peer links.
//!
//! Every frame starts with a one-byte tag; the rest of the layout depends on
//! the tag. Multi-byte integers are big-endian. MESSAGE payloads carry a
//! 3-byte length, so no frame can carry more than 2^24 - 1 bytes.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

use crate::constants::message::MAX_PAYLOAD_LEN;
use crate::constants::wire::*;
use crate::error::WireError;

/// Host and port a peer accepts connections on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl std::str::FromStr for PeerAddr {
    type Err = String;

    /// Accepts `host:port` and `[v6]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Missing port in address '{}'", s))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("Invalid port in address '{}': {}", s, e))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("Missing host in address '{}'", s));
        }
        Ok(Self::new(host, port))
    }
}

/// One complete unit of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Hello { version: u8 },
    Goodbye,
    SharePeer(PeerAddr),
    RequestPeer,
    Message(Bytes),
    MessageAck(u16),
    Malformed(u16),
    /// Empty host means "the address you see me connecting from"
    Advertise { host: String, port: u16 },
    Shutdown,
}

impl Frame {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "HELLO",
            Frame::Goodbye => "GOODBYE",
            Frame::SharePeer(_) => "SHAREPEER",
            Frame::RequestPeer => "REQUESTPEER",
            Frame::Message(_) => "MESSAGE",
            Frame::MessageAck(_) => "MESSAGEACK",
            Frame::Malformed(_) => "MALFORMED",
            Frame::Advertise { .. } => "ADVERTISE",
            Frame::Shutdown => "SHUTDOWN",
        }
    }

    /// Serialize into a ready-to-send byte buffer.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut out = Vec::new();
        match self {
            Frame::Hello { version } => {
                out.push(HELLO);
                out.push(*version);
            }
            Frame::Goodbye => out.push(GOODBYE),
            Frame::SharePeer(addr) => {
                out.push(SHAREPEER);
                push_address(&mut out, &addr.host, addr.port)?;
            }
            Frame::RequestPeer => out.push(REQUESTPEER),
            Frame::Message(payload) => {
                if payload.len() > MAX_PAYLOAD_LEN {
                    return Err(WireError::PayloadTooLarge {
                        size: payload.len(),
                        max: MAX_PAYLOAD_LEN,
                    });
                }
                out.reserve(4 + payload.len());
                out.push(MESSAGE);
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
                out.extend_from_slice(payload);
            }
            Frame::MessageAck(n) => {
                out.push(MESSAGEACK);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Frame::Malformed(n) => {
                out.push(MALFORMED);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Frame::Advertise { host, port } => {
                out.push(ADVERTISE);
                push_address(&mut out, host, *port)?;
            }
            Frame::Shutdown => out.extend_from_slice(SHUTDOWN_SENTINEL),
        }
        Ok(Bytes::from(out))
    }
}

fn push_address(out: &mut Vec<u8>, host: &str, port: u16) -> Result<(), WireError> {
    let len = u8::try_from(host.len()).map_err(|_| WireError::AddressTooLong(host.len()))?;
    out.push(len);
    out.extend_from_slice(host.as_bytes());
    out.extend_from_slice(&port.to_be_bytes());
    Ok(())
}

/// Lengths reported in 2-byte diagnostic frames saturate
pub fn saturate_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

/// Result of one framer pass over an input buffer
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub frames: Vec<Frame>,
    /// Set when an unknown tag was hit; holds the discarded byte count
    pub malformed: Option<usize>,
}

/// Slice every complete frame off the front of `buf`.
///
/// Incomplete trailing data is left in `buf` for the next pass. On an
/// unknown tag the whole remaining buffer is dropped and its length reported
/// through `malformed`; the framer makes no attempt to resynchronize.
pub fn parse_frames(buf: &mut BytesMut) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    while !buf.is_empty() {
        match buf[0] {
            HELLO => {
                if buf.len() < 2 {
                    break;
                }
                let version = buf[1];
                buf.advance(2);
                outcome.frames.push(Frame::Hello { version });
            }
            GOODBYE => {
                buf.advance(1);
                outcome.frames.push(Frame::Goodbye);
            }
            SHAREPEER => {
                let Some((host, port)) = take_address(buf) else {
                    break;
                };
                if host.len() >= MIN_SHARED_ADDR_LEN {
                    outcome
                        .frames
                        .push(Frame::SharePeer(PeerAddr::new(host, port)));
                }
            }
            REQUESTPEER => {
                buf.advance(1);
                outcome.frames.push(Frame::RequestPeer);
            }
            MESSAGE => {
                if buf.len() < 4 {
                    break;
                }
                let len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
                if buf.len() < 4 + len {
                    break;
                }
                buf.advance(4);
                outcome.frames.push(Frame::Message(buf.split_to(len).freeze()));
            }
            MESSAGEACK | MALFORMED => {
                if buf.len() < 3 {
                    break;
                }
                let tag = buf[0];
                let value = u16::from_be_bytes([buf[1], buf[2]]);
                buf.advance(3);
                outcome.frames.push(if tag == MESSAGEACK {
                    Frame::MessageAck(value)
                } else {
                    Frame::Malformed(value)
                });
            }
            ADVERTISE => {
                let Some((host, port)) = take_address(buf) else {
                    break;
                };
                outcome.frames.push(Frame::Advertise { host, port });
            }
            _ => {
                if buf.len() >= SHUTDOWN_SENTINEL.len()
                    && &buf[..SHUTDOWN_SENTINEL.len()] == SHUTDOWN_SENTINEL.as_slice()
                {
                    outcome.frames.push(Frame::Shutdown);
                    buf.clear();
                    break;
                }
                if buf.len() < SHUTDOWN_SENTINEL.len()
                    && SHUTDOWN_SENTINEL.starts_with(&buf[..])
                {
                    // Possibly a sentinel still in flight
                    break;
                }
                outcome.malformed = Some(buf.len());
                buf.clear();
            }
        }
    }

    outcome
}

/// `[len u8][host][port u16]` after the tag. Consumes the bytes only when the
/// field is complete. Non UTF-8 hosts are replaced lossily.
fn take_address(buf: &mut BytesMut) -> Option<(String, u16)> {
    if buf.len() < 2 {
        return None;
    }
    let addr_len = buf[1] as usize;
    if buf.len() < 4 + addr_len {
        return None;
    }
    let host = String::from_utf8_lossy(&buf[2..2 + addr_len]).into_owned();
    let port = u16::from_be_bytes([buf[2 + addr_len], buf[3 + addr_len]]);
    buf.advance(4 + addr_len);
    Some((host, port))
}

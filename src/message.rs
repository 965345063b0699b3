//! Application message format and its binary codec.
//!
//! Layout: `[signature 64][timestamp u64 BE][ttl u32 BE][channel len u8][channel][payload]`
//!
//! The whole encoded message must fit the 3-byte length field of a MESSAGE
//! frame, so it is bounded by 2^24 - 1 bytes.

use rand::RngCore;
use sha2::{Digest, Sha512};
use std::fmt;

use crate::constants::message::{
    HEADER_LEN, MAX_CHANNEL_LEN, MAX_PAYLOAD_LEN, MAX_TTL, MIN_TTL, SIGNATURE_LEN,
    SIGNATURE_SALT,
};
use crate::error::MessageError;

/// Probabilistically unique message identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Digest of a nanosecond clock reading, the salt and 32 random bytes.
    pub fn generate() -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_micros().saturating_mul(1000));
        let mut noise = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut noise);

        let mut hasher = Sha512::new();
        hasher.update(nanos.to_be_bytes());
        hasher.update(SIGNATURE_SALT);
        hasher.update(noise);

        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes in hex, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.short())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn validate_timestamp(timestamp: i64) -> Result<u64, MessageError> {
    if timestamp < 0 {
        return Err(MessageError::InvalidTimestamp(timestamp));
    }
    Ok(timestamp as u64)
}

pub fn validate_ttl(ttl: i64) -> Result<u32, MessageError> {
    if ttl < MIN_TTL as i64 || ttl > MAX_TTL as i64 {
        return Err(MessageError::InvalidTtl(ttl));
    }
    Ok(ttl as u32)
}

pub fn validate_channel(channel: &str) -> Result<(), MessageError> {
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(MessageError::InvalidChannel(channel.len()));
    }
    Ok(())
}

pub fn validate_payload(payload: &[u8]) -> Result<(), MessageError> {
    if payload.is_empty() {
        return Err(MessageError::InvalidPayload("payload is empty".to_string()));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(MessageError::InvalidPayload(format!(
            "{} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    Ok(())
}

/// A signed, time-bounded gossip message. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    signature: Signature,
    timestamp: u64,
    ttl: u32,
    channel: String,
    payload: Vec<u8>,
}

impl Message {
    /// Build a fresh message stamped with the current time.
    pub fn new(
        channel: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        ttl: i64,
    ) -> Result<Self, MessageError> {
        MessageBuilder::new()
            .timestamp(chrono::Utc::now().timestamp())?
            .ttl(ttl)?
            .channel(channel)?
            .payload(payload)?
            .build()
    }

    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Seconds since the epoch at which this message dies
    pub fn expires_at(&self) -> u64 {
        self.timestamp.saturating_add(self.ttl as u64)
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive_at(chrono::Utc::now().timestamp())
    }

    pub fn is_alive_at(&self, now: i64) -> bool {
        // Expiry past i64::MAX never arrives
        i64::try_from(self.expires_at()).map_or(true, |expires| now < expires)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.channel.len() + self.payload.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let size = self.encoded_len();
        if size > MAX_PAYLOAD_LEN {
            return Err(MessageError::TooLarge {
                size,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut data = Vec::with_capacity(size);
        data.extend_from_slice(self.signature.as_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&self.ttl.to_be_bytes());
        data.push(self.channel.len() as u8);
        data.extend_from_slice(self.channel.as_bytes());
        data.extend_from_slice(&self.payload);
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < HEADER_LEN {
            return Err(MessageError::Malformed(format!(
                "{} bytes is shorter than the {}-byte header",
                data.len(),
                HEADER_LEN
            )));
        }

        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(&data[..SIGNATURE_LEN]);
        let mut cursor = SIGNATURE_LEN;

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[cursor..cursor + 8]);
        cursor += 8;
        let timestamp = u64::from_be_bytes(ts);

        let mut ttl = [0u8; 4];
        ttl.copy_from_slice(&data[cursor..cursor + 4]);
        cursor += 4;
        let ttl = u32::from_be_bytes(ttl);

        let chan_len = data[cursor] as usize;
        cursor += 1;
        if data.len() < cursor + chan_len {
            return Err(MessageError::Malformed(format!(
                "channel length {} overruns {} remaining bytes",
                chan_len,
                data.len() - cursor
            )));
        }
        let channel = std::str::from_utf8(&data[cursor..cursor + chan_len])
            .map_err(|e| MessageError::Malformed(format!("channel is not UTF-8: {}", e)))?;
        cursor += chan_len;

        // Timestamps above i64::MAX cannot come from a real clock
        let timestamp = i64::try_from(timestamp).unwrap_or(-1);

        MessageBuilder::new()
            .signature(Signature::from_bytes(sig))
            .timestamp(timestamp)?
            .ttl(ttl as i64)?
            .channel(channel)?
            .payload(&data[cursor..])?
            .build()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("signature", &self.signature)
            .field("timestamp", &self.timestamp)
            .field("ttl", &self.ttl)
            .field("channel", &self.channel)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Field-by-field constructor. Every setter validates on its own; `build`
/// fails if a field was never set.
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    signature: Option<Signature>,
    timestamp: Option<u64>,
    ttl: Option<u32>,
    channel: Option<String>,
    payload: Option<Vec<u8>>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Result<Self, MessageError> {
        self.timestamp = Some(validate_timestamp(timestamp)?);
        Ok(self)
    }

    pub fn ttl(mut self, ttl: i64) -> Result<Self, MessageError> {
        self.ttl = Some(validate_ttl(ttl)?);
        Ok(self)
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Result<Self, MessageError> {
        let channel = channel.into();
        validate_channel(&channel)?;
        self.channel = Some(channel);
        Ok(self)
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Result<Self, MessageError> {
        let payload = payload.into();
        validate_payload(&payload)?;
        self.payload = Some(payload);
        Ok(self)
    }

    /// Missing signatures are generated here, once.
    pub fn build(self) -> Result<Message, MessageError> {
        Ok(Message {
            signature: self.signature.unwrap_or_else(Signature::generate),
            timestamp: self
                .timestamp
                .ok_or(MessageError::MissingField("timestamp"))?,
            ttl: self.ttl.ok_or(MessageError::MissingField("ttl"))?,
            channel: self.channel.ok_or(MessageError::MissingField("channel"))?,
            payload: self.payload.ok_or(MessageError::MissingField("payload"))?,
        })
    }
}

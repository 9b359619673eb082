//! Immutable message envelope and its header model.
//!
//! A [`Message`] pairs a [`Value`] payload with [`MessageHeaders`]. Every
//! message carries a unique `id` and a creation `timestamp`; both are assigned
//! by [`MessageBuilder::build`] and cannot be overridden by callers. Messages
//! expose no mutating accessors: replies and derived messages are new
//! instances built from the original's headers.
//!
//! # Wire format
//!
//! Messages encode to `MsgPack` with named fields via `rmp_serde::to_vec_named()`
//! for transports that carry messages across process boundaries.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{ClockSource, SystemClock};
use crate::types::Value;

/// Well-known header names.
pub mod headers {
    /// Unique message identifier (UUID v4 string). Reserved.
    pub const ID: &str = "id";
    /// Creation time in milliseconds since Unix epoch. Reserved.
    pub const TIMESTAMP: &str = "timestamp";
    /// Name of the channel a reply should be sent to.
    pub const REPLY_CHANNEL: &str = "replyChannel";
    /// Name of the channel failures should be reported to.
    pub const ERROR_CHANNEL: &str = "errorChannel";
    /// Identifier shared by a request and its reply, or by a split sequence.
    pub const CORRELATION_ID: &str = "correlationId";
    /// 1-based position within a sequence.
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
    /// Total number of messages in a sequence.
    pub const SEQUENCE_SIZE: &str = "sequenceSize";

    /// Returns true for headers assigned only by the builder.
    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        name == ID || name == TIMESTAMP
    }
}

// ---------------------------------------------------------------------------
// MessageHeaders
// ---------------------------------------------------------------------------

/// Read-only header mapping of a [`Message`].
///
/// Uses `BTreeMap` for deterministic iteration and serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHeaders(BTreeMap<String, Value>);

impl MessageHeaders {
    /// The message's unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.get_str(headers::ID).unwrap_or_default()
    }

    /// Creation time in milliseconds since Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.get(headers::TIMESTAMP)
            .and_then(Value::as_i64)
            .and_then(|t| u64::try_from(t).ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns the header as a string slice, if present and a string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn reply_channel(&self) -> Option<&str> {
        self.get_str(headers::REPLY_CHANNEL)
    }

    #[must_use]
    pub fn error_channel(&self) -> Option<&str> {
        self.get_str(headers::ERROR_CHANNEL)
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.get_str(headers::CORRELATION_ID)
    }

    #[must_use]
    pub fn sequence_number(&self) -> Option<i64> {
        self.get(headers::SEQUENCE_NUMBER).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn sequence_size(&self) -> Option<i64> {
        self.get(headers::SEQUENCE_SIZE).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a MessageHeaders {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Immutable envelope carrying a payload and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    headers: MessageHeaders,
    payload: Value,
}

/// Errors from encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("decoded message is missing required header '{0}'")]
    MissingHeader(&'static str),
}

impl Message {
    /// Creates a message with the given payload and only the reserved headers.
    pub fn new(payload: impl Into<Value>) -> Self {
        MessageBuilder::with_payload(payload).build()
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Shorthand for `headers().id()`.
    #[must_use]
    pub fn id(&self) -> &str {
        self.headers.id()
    }

    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Encodes the message as named-field `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decodes a message produced by [`Message::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for malformed input and
    /// [`CodecError::MissingHeader`] when `id` or `timestamp` is absent.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let message: Message = rmp_serde::from_slice(bytes)?;
        if message.headers.get_str(headers::ID).is_none() {
            return Err(CodecError::MissingHeader(headers::ID));
        }
        if message.headers.get(headers::TIMESTAMP).and_then(Value::as_i64).is_none() {
            return Err(CodecError::MissingHeader(headers::TIMESTAMP));
        }
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// MessageBuilder
// ---------------------------------------------------------------------------

/// Builds new [`Message`] instances.
///
/// The reserved `id` and `timestamp` headers are always assigned at
/// [`build`](Self::build) time; attempts to set them are ignored.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    payload: Value,
    headers: BTreeMap<String, Value>,
}

impl MessageBuilder {
    /// Starts a builder for a message with the given payload and no headers.
    pub fn with_payload(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Starts a builder that copies the payload and non-reserved headers of
    /// `message`. The built message gets a fresh id and timestamp.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self::with_payload(message.payload.clone()).copy_headers(&message.headers)
    }

    /// Copies every non-reserved header, overwriting existing values.
    #[must_use]
    pub fn copy_headers(mut self, source: &MessageHeaders) -> Self {
        for (name, value) in source {
            if !headers::is_reserved(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }

    /// Copies non-reserved headers that are not already set.
    #[must_use]
    pub fn copy_headers_if_absent(mut self, source: &MessageHeaders) -> Self {
        for (name, value) in source {
            if !headers::is_reserved(name) {
                self.headers
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        self
    }

    /// Sets a header. Reserved names are ignored.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if headers::is_reserved(&name) {
            tracing::warn!(header = %name, "ignoring attempt to set reserved header");
        } else {
            self.headers.insert(name, value.into());
        }
        self
    }

    /// Sets a header only if it has no value yet.
    #[must_use]
    pub fn header_if_absent(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if !headers::is_reserved(&name) {
            self.headers.entry(name).or_insert_with(|| value.into());
        }
        self
    }

    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    #[must_use]
    pub fn reply_channel(self, channel: impl Into<String>) -> Self {
        self.header(headers::REPLY_CHANNEL, channel.into())
    }

    #[must_use]
    pub fn correlation_id(self, id: impl Into<String>) -> Self {
        self.header(headers::CORRELATION_ID, id.into())
    }

    /// Marks the message as element `number` (1-based) of a sequence of `size`.
    #[must_use]
    pub fn sequence(self, number: i64, size: i64) -> Self {
        self.header(headers::SEQUENCE_NUMBER, number)
            .header(headers::SEQUENCE_SIZE, size)
    }

    /// Builds the message using the system clock.
    #[must_use]
    pub fn build(self) -> Message {
        self.build_with_clock(&SystemClock)
    }

    /// Builds the message, stamping `timestamp` from `clock`.
    #[must_use]
    pub fn build_with_clock(mut self, clock: &dyn ClockSource) -> Message {
        self.headers.insert(
            headers::ID.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
        self.headers.insert(
            headers::TIMESTAMP.to_string(),
            Value::Int(i64::try_from(clock.now()).unwrap_or(i64::MAX)),
        );
        Message {
            headers: MessageHeaders(self.headers),
            payload: self.payload,
        }
    }
}

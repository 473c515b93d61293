//! Wire format message type for the msgrelay protocol.
//!
//! A [`Message`] is the only record exchanged between clients and the relay
//! server. The same shape travels in both directions over the WebSocket and
//! is returned, as a JSON array, by the history endpoint.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Sender identity stamped on acknowledgements generated by the server.
pub const SERVER_SENDER: &str = "Server";

/// Content of every acknowledgement generated by the server.
pub const ACK_CONTENT: &str = "Received your message!";

/// Timestamp given to a message that arrives without one,
/// `0001-01-01T00:00:00Z`.
#[must_use]
pub fn unset_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

/// A message tagged with sender and receiver identities.
///
/// Identities are opaque strings. The timestamp is assigned by whoever
/// produced the message: the client for inbound messages, the server for
/// acknowledgements.
///
/// Decoding is lenient about absent fields: missing identities and content
/// decode as empty strings and a missing timestamp decodes as
/// [`unset_timestamp`]. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    /// Identity of the party that produced the message.
    #[serde(rename = "sender_id")]
    pub sender: String,
    /// Identity of the intended recipient.
    #[serde(rename = "receiver_id")]
    pub receiver: String,
    /// Arbitrary text body.
    pub content: String,
    /// When the producer created the message.
    pub timestamp: DateTime<Utc>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new("", "", "", unset_timestamp())
    }
}

impl Message {
    /// Creates a message with an explicit timestamp.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
            timestamp,
        }
    }

    /// Creates a message stamped with the current time.
    pub fn now(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(sender, receiver, content, Utc::now())
    }

    /// Builds the server acknowledgement for a message sent by `original_sender`.
    pub fn acknowledgement(original_sender: impl Into<String>) -> Self {
        Self::now(SERVER_SENDER, original_sender, ACK_CONTENT)
    }

    /// Returns `true` if this message names `identity` as its receiver.
    ///
    /// The comparison is exact and case-sensitive.
    #[must_use]
    pub fn is_addressed_to(&self, identity: &str) -> bool {
        self.receiver == identity
    }

    /// Returns the timestamp formatted as RFC 3339 with second precision.
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} at {}: {}",
            self.sender,
            self.receiver,
            self.timestamp_rfc3339(),
            self.content
        )
    }
}

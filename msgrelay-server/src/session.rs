//! Per-connection session loop.
//!
//! A session is bound to one receiver identity, taken from the upgrade
//! request, for its whole lifetime. It then repeats one cycle per inbound
//! frame:
//!
//! 1. Decode the frame into a [`Message`].
//! 2. Persist it through the [`MessageStore`], bounded by the relay's store
//!    timeout.
//! 3. If the message's receiver equals the bound identity, write an
//!    acknowledgement addressed to the message's sender back on the same
//!    socket.
//!
//! Any failure in any step ends the session. Nothing is retried and nothing
//! is reported to the peer.

use std::fmt::Display;

use axum::extract::ws::Message as WsMessage;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use msgrelay_proto::Message;
use msgrelay_proto::codec::{self, CodecError};

use crate::relay::RelayState;
use crate::store::{self, MessageStore, StoreError};

/// Why a session reached [`SessionState::Closed`].
#[derive(Debug, thiserror::Error)]
pub enum CloseReason {
    /// The upgrade request carried no receiver identity.
    #[error("receiver identity missing from upgrade request")]
    MissingReceiver,

    /// The peer sent a close frame or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,

    /// An inbound frame could not be decoded, or an acknowledgement could
    /// not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The store rejected or timed out on the append.
    #[error("failed to persist message: {0}")]
    Persist(#[from] StoreError),

    /// Reading from or writing to the socket failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Lifecycle of a single session.
#[derive(Debug)]
pub enum SessionState {
    /// Upgraded and bound to a receiver identity; no frame read yet.
    Established {
        /// The identity this connection represents.
        receiver: String,
    },
    /// Processing inbound frames.
    Active {
        /// The identity this connection represents.
        receiver: String,
    },
    /// Terminal. The socket is released once the session returns.
    Closed(CloseReason),
}

impl SessionState {
    /// Binds a new session to the `receiver_id` from the upgrade request.
    ///
    /// A missing or empty identity goes straight to `Closed` without ever
    /// becoming `Active`.
    #[must_use]
    pub fn establish(receiver: Option<String>) -> Self {
        match receiver {
            Some(receiver) if !receiver.is_empty() => Self::Established { receiver },
            _ => Self::Closed(CloseReason::MissingReceiver),
        }
    }

    /// Returns `true` once the session has terminated.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Drives a session until it closes and returns the reason.
///
/// `inbound` and `outbound` are the two halves of the upgraded socket. The
/// session has exclusive use of both for its lifetime.
pub async fn run<S, R, E, W>(
    relay: &RelayState<S>,
    receiver: Option<String>,
    inbound: &mut R,
    outbound: &mut W,
) -> CloseReason
where
    S: MessageStore,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let mut state = SessionState::establish(receiver);
    loop {
        state = match state {
            SessionState::Established { receiver } => {
                tracing::info!(receiver = %receiver, "session active");
                SessionState::Active { receiver }
            }
            SessionState::Active { receiver } => {
                match process_next(relay, &receiver, inbound, outbound).await {
                    Ok(()) => SessionState::Active { receiver },
                    Err(reason) => SessionState::Closed(reason),
                }
            }
            SessionState::Closed(reason) => return reason,
        };
    }
}

/// Runs one receive -> persist -> maybe-ack cycle.
async fn process_next<S, R, E, W>(
    relay: &RelayState<S>,
    receiver: &str,
    inbound: &mut R,
    outbound: &mut W,
) -> Result<(), CloseReason>
where
    S: MessageStore,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let message = next_message(inbound).await?;
    tracing::info!(
        sender = %message.sender,
        receiver = %message.receiver,
        content = %message.content,
        timestamp = %message.timestamp_rfc3339(),
        "received message"
    );

    store::with_timeout(relay.store_timeout(), relay.store().append(message.clone())).await?;

    if !message.is_addressed_to(receiver) {
        return Ok(());
    }

    let ack = Message::acknowledgement(message.sender);
    let text = codec::encode(&ack)?;
    outbound
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| CloseReason::Transport(e.to_string()))?;

    tracing::info!(
        sender = %ack.sender,
        receiver = %ack.receiver,
        content = %ack.content,
        timestamp = %ack.timestamp_rfc3339(),
        "sent acknowledgement"
    );
    Ok(())
}

/// Waits for the next data frame and decodes it.
///
/// Ping and pong frames are skipped; the transport answers pings itself.
async fn next_message<R, E>(inbound: &mut R) -> Result<Message, CloseReason>
where
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    loop {
        match inbound.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(codec::decode_str(text.as_str())?),
            Some(Ok(WsMessage::Binary(data))) => return Ok(codec::decode(&data)?),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
            Some(Ok(WsMessage::Close(_))) | None => return Err(CloseReason::PeerClosed),
            Some(Err(e)) => return Err(CloseReason::Transport(e.to_string())),
        }
    }
}

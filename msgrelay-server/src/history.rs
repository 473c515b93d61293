//! History query handler for `GET /messages`.
//!
//! Stateless: each request reads `receiver_id` and `limit` from the query
//! string, asks the store for matching messages, and returns them as a JSON
//! array in the store's natural order.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use msgrelay_proto::Message;

use crate::relay::RelayState;
use crate::store::{self, MessageStore, StoreError};

/// Number of messages returned when `limit` is absent or unusable.
pub const DEFAULT_LIMIT: usize = 100;

/// Body of the 500 response returned when the store query fails.
pub const FETCH_ERROR_BODY: &str = "Error fetching messages";

/// Query parameters accepted by `GET /messages`.
#[derive(Debug, Default)]
pub struct HistoryParams {
    /// Receiver identity to match. Absent means the empty identity.
    pub receiver_id: String,
    /// Maximum number of messages, as sent by the client.
    pub limit: Option<String>,
}

impl HistoryParams {
    /// Picks the parameters out of raw query pairs. When a key repeats, the
    /// first value wins.
    #[must_use]
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            receiver_id: first_value(pairs, "receiver_id").unwrap_or_default(),
            limit: first_value(pairs, "limit"),
        }
    }
}

/// Returns the first value recorded for `key` in decoded query pairs.
pub(crate) fn first_value(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.clone())
}

/// Parses the `limit` parameter.
///
/// Leading whitespace and a `+` sign are skipped, then the leading run of
/// digits is read, so `"10abc"` is 10. Anything that yields no positive
/// integer (absent, empty, non-numeric, negative, zero) falls back to
/// [`DEFAULT_LIMIT`]. There is no upper bound.
#[must_use]
pub fn parse_limit(raw: Option<&str>) -> usize {
    raw.map(|s| {
        let s = s.trim_start();
        let s = s.strip_prefix('+').unwrap_or(s);
        let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        &s[..end]
    })
    .and_then(|digits| digits.parse::<usize>().ok())
    .filter(|&n| n > 0)
    .unwrap_or(DEFAULT_LIMIT)
}

/// Fetches up to `limit` messages addressed to `receiver`, bounded by
/// `timeout`.
///
/// An empty result is not an error.
///
/// # Errors
///
/// Returns the store's error, or [`StoreError::Timeout`].
pub async fn query_history<S: MessageStore>(
    store: &S,
    timeout: Duration,
    receiver: &str,
    limit: usize,
) -> Result<Vec<Message>, StoreError> {
    let messages = store::with_timeout(timeout, store.query_by_receiver(receiver, limit)).await?;
    for message in &messages {
        tracing::debug!(
            sender = %message.sender,
            receiver = %message.receiver,
            timestamp = %message.timestamp_rfc3339(),
            "history result"
        );
    }
    Ok(messages)
}

/// axum handler for `GET /messages`.
///
/// Responds `200` with a JSON array on success, or `500` with a plain-text
/// body if the store query fails.
pub async fn messages_handler<S: MessageStore>(
    State(state): State<Arc<RelayState<S>>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = HistoryParams::from_pairs(&pairs);
    let limit = parse_limit(params.limit.as_deref());
    match query_history(
        state.store(),
        state.store_timeout(),
        &params.receiver_id,
        limit,
    )
    .await
    {
        Ok(messages) => {
            tracing::info!(
                receiver = %params.receiver_id,
                limit = limit,
                count = messages.len(),
                "served message history"
            );
            Json(messages).into_response()
        }
        Err(e) => {
            tracing::error!(
                receiver = %params.receiver_id,
                error = %e,
                "history query failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, FETCH_ERROR_BODY).into_response()
        }
    }
}

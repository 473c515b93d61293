//! Relay server core: shared state, HTTP routes and server startup.
//!
//! The server exposes two routes:
//!
//! - `GET /ws?receiver_id=<id>` upgrades to a WebSocket and hands the socket
//!   to a [`session`] bound to `<id>`.
//! - `GET /messages?receiver_id=<id>&limit=<n>` returns persisted messages
//!   for `<id>` (see [`history`]).
//!
//! Every session and request shares one [`MessageStore`] through
//! [`RelayState`]; there is no other shared state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::history;
use crate::session::{self, CloseReason};
use crate::store::{DEFAULT_STORE_TIMEOUT, MessageStore};

/// Shared relay server state: the message store and the bound applied to
/// every store call.
pub struct RelayState<S> {
    store: S,
    store_timeout: Duration,
}

impl<S: MessageStore> RelayState<S> {
    /// Creates relay state around `store` with the default store timeout.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Overrides the bound applied to each store operation.
    #[must_use]
    pub const fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// The shared message store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The bound applied to each store operation.
    pub const fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default)]
pub struct ConnectParams {
    /// Identity this connection represents.
    pub receiver_id: Option<String>,
}

impl ConnectParams {
    /// Picks the parameters out of raw query pairs. A repeated
    /// `receiver_id` binds the first value.
    #[must_use]
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            receiver_id: history::first_value(pairs, "receiver_id"),
        }
    }
}

/// Handles an upgraded WebSocket connection for a single session.
///
/// The session owns both halves of the socket until it closes; they are
/// dropped, and the connection released, when this function returns. A
/// session without a receiver identity is dropped without writing any frame.
pub async fn handle_socket<S: MessageStore>(
    socket: WebSocket,
    state: Arc<RelayState<S>>,
    receiver: Option<String>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let bound = receiver.clone().unwrap_or_default();

    let reason = session::run(&state, receiver, &mut ws_receiver, &mut ws_sender).await;

    match &reason {
        CloseReason::MissingReceiver => {
            tracing::warn!("receiver_id missing from upgrade request, closing connection");
        }
        CloseReason::PeerClosed => {
            // Flush the close handshake reply; the peer may already be gone.
            let _ = ws_sender.close().await;
            tracing::info!(receiver = %bound, "session closed by peer");
        }
        CloseReason::Codec(e) => {
            tracing::warn!(receiver = %bound, error = %e, "session closed on malformed frame");
        }
        CloseReason::Persist(e) => {
            tracing::error!(receiver = %bound, error = %e, "session closed on store failure");
        }
        CloseReason::Transport(e) => {
            tracing::warn!(receiver = %bound, error = %e, "session closed on transport error");
        }
    }
}

/// axum handler that upgrades an HTTP request to a WebSocket session.
///
/// The upgrade always succeeds; a missing `receiver_id` is handled by the
/// session, which closes immediately.
async fn ws_handler<S: MessageStore>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState<S>>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let params = ConnectParams::from_pairs(&pairs);
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.receiver_id))
}

/// Builds the relay's router over `state`.
pub fn router<S: MessageStore>(state: Arc<RelayState<S>>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S>))
        .route("/messages", axum::routing::get(history::messages_handler::<S>))
        .with_state(state)
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: MessageStore>(
    addr: &str,
    state: Arc<RelayState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops accepting connections once `shutdown`
/// completes.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown<S: MessageStore>(
    addr: &str,
    state: Arc<RelayState<S>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address,
/// the join handle and the shared state so tests can inspect the store.
#[cfg(test)]
pub async fn start_test_server() -> (
    std::net::SocketAddr,
    tokio::task::JoinHandle<()>,
    Arc<RelayState<crate::store::MemoryStore>>,
) {
    let state = Arc::new(RelayState::new(crate::store::MemoryStore::new()));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, handle, state)
}

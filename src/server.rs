//! HTTP surface: stream and publish endpoints over axum.
//!
//! ## Routes
//!
//! - `GET /event/:id` opens a server-sent event stream on channel `id`.
//! - `PATCH /event/:id` publishes the JSON body on channel `id`.
//! - `GET /health` returns `{ "ok": true }`.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use bytes::Bytes;
use futures::Stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::readers::SubscriptionMultiplexer;
use crate::session::StreamSession;
use crate::sse::{ChannelSink, SseEncoder};
use crate::writers::PublishDispatcher;
use crate::ChannelKey;

const DEFAULT_SINK_CAPACITY: usize = 16;

/// Everything the handlers share.
#[derive(Clone, Debug)]
pub struct AppState {
    dispatcher: PublishDispatcher,
    multiplexer: SubscriptionMultiplexer,
    encoder: SseEncoder,
    shutdown: CancellationToken,
    sink_capacity: usize,
}

impl AppState {
    pub fn new(
        dispatcher: PublishDispatcher,
        multiplexer: SubscriptionMultiplexer,
        encoder: SseEncoder,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            multiplexer,
            encoder,
            shutdown,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }

    /// Number of unsent body chunks a slow client may accumulate.
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity.max(1);
        self
    }

    /// Root token; cancelling it ends every live session.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Build the relay's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/event/", patch(missing_channel_handler))
        .route("/event/:id", get(stream_handler).patch(publish_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then cancel every session and drain connections.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let root = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Serving event streams");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested; closing event streams");
            root.cancel();
        })
        .await
}

fn error_response(status: StatusCode, error: impl Display) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn missing_channel_handler() -> Response {
    error_response(StatusCode::BAD_REQUEST, "missing channel key")
}

/// `GET /event/:id`
///
/// Subscription failures answer 500 before any body byte is sent. Once the
/// headers are out the status can no longer change.
async fn stream_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let channel = match ChannelKey::new(id) {
        Ok(channel) => channel,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    let mut session = StreamSession::new(channel.clone(), &state.shutdown);
    if let Err(err) = session.open(&state.multiplexer).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, err);
    }

    let cancel = session.cancellation_token();
    let (mut sink, receiver) = ChannelSink::new(state.sink_capacity);
    let encoder = state.encoder.clone();
    tokio::spawn(async move {
        let end = session.stream(&encoder, &mut sink).await;
        debug!(channel = %session.channel(), state = ?end, "Session finished");
    });

    let headers = match receiver.headers.await {
        Ok(headers) => headers,
        Err(_) => {
            cancel.cancel();
            warn!(channel = %channel, "Session ended before the response started");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "stream closed before start");
        }
    };

    let mut response = Response::builder().status(StatusCode::OK);
    for (name, value) in headers {
        response = response.header(name, value);
    }
    let body = SessionBody {
        chunks: receiver.body,
        _cancel_on_drop: cancel.drop_guard(),
    };
    match response.body(Body::from_stream(body)) {
        Ok(response) => response,
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

/// `PATCH /event/:id`
async fn publish_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let channel = match ChannelKey::new(id) {
        Ok(channel) => channel,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.dispatcher.publish(&channel, &payload).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

/// Response body of one session. Dropping it (client gone) cancels the session.
struct SessionBody {
    chunks: ReceiverStream<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl Stream for SessionBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.chunks)
            .poll_next(cx)
            .map(|chunk| chunk.map(Ok))
    }
}

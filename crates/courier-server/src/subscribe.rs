//! `GET /events`: the server-sent event stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use courier_core::ConnectionId;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::registry::{ConnectionRegistry, Frame, RegistryError};
use crate::server::AppState;

/// Removes a connection from the registry when the response body is dropped.
///
/// hyper drops the body once the client goes away, which makes this the
/// disconnect observer.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(registry: Arc<ConnectionRegistry>, id: ConnectionId) -> Self {
        Self { registry, id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.id) {
            info!(connection_id = %self.id, "subscriber disconnected");
        }
    }
}

pin_project! {
    /// Encoded frames for one subscriber.
    pub struct SubscriptionStream {
        #[pin]
        frames: ReceiverStream<Frame>,
        guard: ConnectionGuard,
    }
}

impl SubscriptionStream {
    pub fn new(rx: mpsc::Receiver<Frame>, guard: ConnectionGuard) -> Self {
        Self {
            frames: ReceiverStream::new(rx),
            guard,
        }
    }
}

impl Stream for SubscriptionStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .frames
            .poll_next(cx)
            .map(|frame| frame.map(|f| Ok(f.encode())))
    }
}

/// Register a subscriber and stream frames to it until either side closes.
pub async fn subscribe(State(state): State<AppState>) -> Result<Response, ApiError> {
    if state.shutdown.is_shutting_down() {
        return Err(ApiError::Unavailable("server is shutting down".into()));
    }

    let (connection, rx) = state.registry.open_acknowledged().map_err(|e| match e {
        RegistryError::Closed => ApiError::Unavailable("server is shutting down".into()),
        other => ApiError::Internal(other.to_string()),
    })?;
    let id = connection.id().clone();
    drop(connection);

    info!(
        connection_id = %id,
        connections = state.registry.len(),
        "subscriber connected"
    );

    let stream = SubscriptionStream::new(rx, ConnectionGuard::new(state.registry.clone(), id));

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|e| {
            debug!(error = %e, "failed to build event stream response");
            ApiError::Internal(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::CourierServer;
    use axum::http::Request;
    use courier_core::EventEnvelope;
    use futures::StreamExt;
    use serde_json::json;
    use tower::ServiceExt;

    fn events_request() -> Request<Body> {
        Request::builder().uri("/events").body(Body::empty()).unwrap()
    }

    async fn next_chunk(stream: &mut axum::body::BodyDataStream) -> String {
        let bytes = stream.next().await.unwrap().unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn guard_drop_removes_connection() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let (conn, rx) = registry.open().unwrap();
        let stream = SubscriptionStream::new(rx, ConnectionGuard::new(registry.clone(), conn.id().clone()));
        assert_eq!(registry.len(), 1);
        drop(stream);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn guard_drop_after_prune_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let (conn, rx) = registry.open().unwrap();
        let stream = SubscriptionStream::new(rx, ConnectionGuard::new(registry.clone(), conn.id().clone()));
        let _ = registry.remove(conn.id());
        drop(stream);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stream_encodes_frames() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let (conn, rx) = registry.open().unwrap();
        let mut stream = SubscriptionStream::new(rx, ConnectionGuard::new(registry.clone(), conn.id().clone()));
        let _ = conn.send(Frame::KeepAlive);
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b":\n\n");
    }

    #[tokio::test]
    async fn stream_ends_when_registry_closes() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let (conn, rx) = registry.open().unwrap();
        let mut stream = SubscriptionStream::new(rx, ConnectionGuard::new(registry.clone(), conn.id().clone()));
        drop(conn);
        let _ = registry.close_all();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn endpoint_sends_connected_then_events() {
        let server = CourierServer::new(ServerConfig::default());
        let resp = server.router().oneshot(events_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[CACHE_CONTROL], "no-cache");

        let mut body = resp.into_body().into_data_stream();
        let first = next_chunk(&mut body).await;
        let id = server.registry().snapshot()[0].id().clone();
        assert_eq!(first, format!("event: connected\ndata: {{\"clientId\":\"{id}\"}}\n\n"));

        let _ = server
            .dispatcher()
            .broadcast(&EventEnvelope::typed("NEW_EMAIL", json!({"subject": "hi"})));
        assert_eq!(
            next_chunk(&mut body).await,
            "data: {\"type\":\"NEW_EMAIL\",\"data\":{\"subject\":\"hi\"}}\n\n"
        );
    }

    #[tokio::test]
    async fn dropping_body_deregisters() {
        let server = CourierServer::new(ServerConfig::default());
        let resp = server.router().oneshot(events_request()).await.unwrap();
        assert_eq!(server.registry().len(), 1);
        drop(resp);
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn subscribe_then_disconnect_leaves_nothing_to_broadcast() {
        let server = CourierServer::new(ServerConfig::default());
        let resp = server.router().oneshot(events_request()).await.unwrap();
        drop(resp);
        let report = server
            .dispatcher()
            .broadcast(&EventEnvelope::typed("NEW_EMAIL", json!({})));
        assert_eq!(report.delivered + report.dropped + report.pruned, 0);
    }

    #[tokio::test]
    async fn refuses_subscribers_during_shutdown() {
        let server = CourierServer::new(ServerConfig::default());
        server.shutdown().shutdown();
        let resp = server.router().oneshot(events_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(server.registry().is_empty());
    }
}

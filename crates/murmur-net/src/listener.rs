//! Inbound side: the HTTP endpoint the local onion service forwards to.
//!
//! Four fixed POST routes, one per handshake stage. Each decodes its JSON
//! body and hands it to an [`InboundHandler`]. Answers are a bare boolean
//! (or an [`IntroduceAnswer`]); no error detail ever leaves this process.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use murmur_shared::protocol::{
    paths, ConfirmKeyRequest, DeliverRequest, IntroduceAnswer, IntroduceRequest, SealedBody,
};

use crate::error::NetError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Largest request body accepted on any route.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Receiver of decoded inbound requests.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn introduce(&self, request: IntroduceRequest) -> IntroduceAnswer;

    async fn confirm_key(&self, request: ConfirmKeyRequest) -> bool;

    async fn set_session_key(&self, request: SealedBody) -> bool;

    async fn deliver(&self, request: DeliverRequest) -> bool;
}

#[derive(Clone)]
struct ListenerState {
    handler: Arc<dyn InboundHandler>,
}

/// Build the inbound router around `handler`.
pub fn build_router(handler: Arc<dyn InboundHandler>, limiter: RateLimiter) -> Router {
    Router::new()
        .route(paths::INTRODUCE, post(introduce))
        .route(paths::CONFIRM_KEY, post(confirm_key))
        .route(paths::SET_SESSION_KEY, post(set_session_key))
        .route(paths::DELIVER, post(deliver))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(ListenerState { handler })
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path, error = %e, "undecodable inbound request");
            None
        }
    }
}

fn refused(answer: impl serde::Serialize) -> Response {
    (StatusCode::BAD_REQUEST, Json(answer)).into_response()
}

async fn introduce(State(state): State<ListenerState>, body: Bytes) -> Response {
    match decode::<IntroduceRequest>(paths::INTRODUCE, &body) {
        Some(req) => Json(state.handler.introduce(req).await).into_response(),
        None => refused(IntroduceAnswer::rejected()),
    }
}

async fn confirm_key(State(state): State<ListenerState>, body: Bytes) -> Response {
    match decode::<ConfirmKeyRequest>(paths::CONFIRM_KEY, &body) {
        Some(req) => Json(state.handler.confirm_key(req).await).into_response(),
        None => refused(false),
    }
}

async fn set_session_key(State(state): State<ListenerState>, body: Bytes) -> Response {
    match decode::<SealedBody>(paths::SET_SESSION_KEY, &body) {
        Some(req) => Json(state.handler.set_session_key(req).await).into_response(),
        None => refused(false),
    }
}

async fn deliver(State(state): State<ListenerState>, body: Bytes) -> Response {
    match decode::<DeliverRequest>(paths::DELIVER, &body) {
        Some(req) => Json(state.handler.deliver(req).await).into_response(),
        None => refused(false),
    }
}

/// A bound, not yet serving, inbound listener.
pub struct Listener {
    tcp: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let tcp = TcpListener::bind(addr).await?;
        Ok(Self { tcp })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.tcp.local_addr()?)
    }

    /// Serve `router` until `shutdown` flips to `true` (or its sender is
    /// dropped). In-flight requests finish before this returns.
    pub async fn serve(self, router: Router, mut shutdown: watch::Receiver<bool>) -> Result<(), NetError> {
        info!(addr = %self.local_addr()?, "inbound listener started");

        axum::serve(
            self.tcp,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            // A dropped sender counts as shutdown too.
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

        info!("inbound listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use murmur_shared::types::{ContactId, PeerAddress, PeerKey};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn introduce(&self, request: IntroduceRequest) -> IntroduceAnswer {
            self.calls.fetch_add(1, Ordering::SeqCst);
            IntroduceAnswer::accepted(ContactId(request.proposed_remote_id.0 + 100))
        }

        async fn confirm_key(&self, _request: ConfirmKeyRequest) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn set_session_key(&self, request: SealedBody) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            !request.0.is_empty()
        }

        async fn deliver(&self, _request: DeliverRequest) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn post_json(path: &str, body: String) -> Request<Body> {
        Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_of(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_introduce_route() {
        let handler = Arc::new(Recorder::default());
        let app = build_router(handler.clone(), RateLimiter::default());

        let req = IntroduceRequest {
            name: "alice".into(),
            hello: "hi".into(),
            address: PeerAddress::parse("alice.onion").unwrap(),
            shared_secret: vec![7; 32],
            public_key: PeerKey([1; 32]),
            proposed_remote_id: ContactId(5),
        };
        let resp = app
            .oneshot(post_json(paths::INTRODUCE, serde_json::to_string(&req).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let answer: IntroduceAnswer = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(answer, IntroduceAnswer::accepted(ContactId(105)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_boolean_routes() {
        let handler = Arc::new(Recorder::default());
        let app = build_router(handler.clone(), RateLimiter::default());

        let resp = app
            .clone()
            .oneshot(post_json(paths::SET_SESSION_KEY, "\"AAEC\"".into()))
            .await
            .unwrap();
        assert_eq!(body_of(resp).await, b"true");

        let deliver = DeliverRequest {
            remote_id: ContactId(1),
            batch: vec![0; 16],
        };
        let resp = app
            .oneshot(post_json(paths::DELIVER, serde_json::to_string(&deliver).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_of(resp).await, b"false");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_garbage_is_refused_without_reaching_handler() {
        let handler = Arc::new(Recorder::default());
        let app = build_router(handler.clone(), RateLimiter::default());

        let resp = app
            .oneshot(post_json(paths::CONFIRM_KEY, "{not json".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(resp).await, b"false");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let app = build_router(Arc::new(Recorder::default()), RateLimiter::default());
        let resp = app.oneshot(post_json("/admin", "{}".into())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(Arc::new(Recorder::default()), RateLimiter::default());
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(listener.serve(app, rx));

        let transport = crate::transport::HttpTransport::new(None).unwrap();
        let peer = PeerAddress::parse(&addr.to_string()).unwrap();
        let ok: bool = crate::transport::call(
            &transport,
            &peer,
            paths::SET_SESSION_KEY,
            &SealedBody(vec![1, 2, 3]),
        )
        .await
        .unwrap();
        assert!(ok);

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}

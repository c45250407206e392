//! In-process [`Transport`] that routes requests straight into registered
//! routers, without sockets. Peers can be taken offline to exercise retry
//! paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use tower::ServiceExt;

use murmur_shared::types::PeerAddress;

use crate::error::NetError;
use crate::listener::MAX_BODY_BYTES;
use crate::transport::Transport;

#[derive(Default)]
pub struct LoopbackTransport {
    routers: Mutex<HashMap<PeerAddress, Router>>,
    offline: Mutex<HashSet<PeerAddress>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `router` reachable as `address`.
    pub fn attach(&self, address: PeerAddress, router: Router) {
        self.routers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address, router);
    }

    /// Toggle whether requests to `address` fail as unreachable.
    pub fn set_offline(&self, address: &PeerAddress, offline: bool) {
        let mut set = self.offline.lock().unwrap_or_else(|e| e.into_inner());
        if offline {
            set.insert(address.clone());
        } else {
            set.remove(address);
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn post(&self, address: &PeerAddress, path: &str, body: Vec<u8>) -> Result<Vec<u8>, NetError> {
        if self
            .offline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(address)
        {
            return Err(NetError::Unreachable(address.to_string()));
        }

        let router = self
            .routers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
            .ok_or_else(|| NetError::Unreachable(address.to_string()))?;

        let req = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| NetError::Unreachable(e.to_string()))?;

        let resp = match router.oneshot(req).await {
            Ok(resp) => resp,
            Err(never) => match never {},
        };
        if !resp.status().is_success() {
            return Err(NetError::Status(resp.status().as_u16()));
        }

        let bytes = axum::body::to_bytes(resp.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| NetError::Unreachable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use murmur_shared::protocol::{
        paths, ConfirmKeyRequest, DeliverRequest, IntroduceAnswer, IntroduceRequest, SealedBody,
    };

    use super::*;
    use crate::listener::{build_router, InboundHandler};
    use crate::rate_limit::RateLimiter;
    use crate::transport::call;

    struct AlwaysYes;

    #[async_trait]
    impl InboundHandler for AlwaysYes {
        async fn introduce(&self, _request: IntroduceRequest) -> IntroduceAnswer {
            IntroduceAnswer::rejected()
        }
        async fn confirm_key(&self, _request: ConfirmKeyRequest) -> bool {
            true
        }
        async fn set_session_key(&self, _request: SealedBody) -> bool {
            true
        }
        async fn deliver(&self, _request: DeliverRequest) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_routes_and_offline_toggle() {
        let transport = LoopbackTransport::new();
        let peer = PeerAddress::parse("bob.onion").unwrap();
        transport.attach(peer.clone(), build_router(Arc::new(AlwaysYes), RateLimiter::default()));

        let ok: bool = call(&transport, &peer, paths::SET_SESSION_KEY, &SealedBody(vec![1]))
            .await
            .unwrap();
        assert!(ok);

        transport.set_offline(&peer, true);
        let err = call::<_, bool>(&transport, &peer, paths::SET_SESSION_KEY, &SealedBody(vec![1])).await;
        assert!(matches!(err, Err(NetError::Unreachable(_))));

        transport.set_offline(&peer, false);
        let ok: bool = call(&transport, &peer, paths::SET_SESSION_KEY, &SealedBody(vec![1]))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_unknown_peer_is_unreachable() {
        let transport = LoopbackTransport::new();
        let peer = PeerAddress::parse("nobody.onion").unwrap();
        let err = transport.post(&peer, paths::DELIVER, Vec::new()).await;
        assert!(matches!(err, Err(NetError::Unreachable(_))));
    }
}

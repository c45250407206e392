//! Outbound side: "send bytes to a peer address + path, get bytes back".
//!
//! The default [`HttpTransport`] posts JSON over HTTP through a SOCKS5 proxy
//! (a local Tor client resolves `.onion` hosts when the scheme is
//! `socks5h`). Without a proxy it talks plain HTTP, which is what tests and
//! local setups use.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use murmur_shared::constants::TRANSPORT_TIMEOUT_SECS;
use murmur_shared::types::PeerAddress;

use crate::error::NetError;

/// A request/response channel to peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `path` on `address` and return the answer body.
    async fn post(&self, address: &PeerAddress, path: &str, body: Vec<u8>) -> Result<Vec<u8>, NetError>;
}

/// Serialize `request`, send it, and decode the answer.
pub async fn call<Req, Resp>(
    transport: &dyn Transport,
    address: &PeerAddress,
    path: &str,
    request: &Req,
) -> Result<Resp, NetError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let body = serde_json::to_vec(request)?;
    let answer = transport.post(address, path, body).await?;
    Ok(serde_json::from_slice(&answer)?)
}

/// [`Transport`] over HTTP, optionally through a SOCKS5 proxy.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    proxied: bool,
}

impl HttpTransport {
    /// Build a client. `proxy` is a URL such as `socks5h://127.0.0.1:9050`;
    /// `None` connects directly.
    pub fn new(proxy: Option<&str>) -> Result<Self, NetError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(TRANSPORT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(TRANSPORT_TIMEOUT_SECS));

        if let Some(url) = proxy {
            let proxy = reqwest::Proxy::all(url).map_err(|e| NetError::Proxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            proxied: proxy.is_some(),
        })
    }

    pub fn is_proxied(&self) -> bool {
        self.proxied
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, address: &PeerAddress, path: &str, body: Vec<u8>) -> Result<Vec<u8>, NetError> {
        let url = format!("http://{}{}", address.authority(), path);
        debug!(peer = %address.short(), path, size = body.len(), "outbound request");

        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::Status(status.as_u16()));
        }

        let bytes = resp.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }
}

fn classify(e: reqwest::Error) -> NetError {
    if e.is_connect() || e.is_timeout() {
        NetError::Unreachable(e.to_string())
    } else {
        NetError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_and_proxied_clients_build() {
        assert!(!HttpTransport::new(None).unwrap().is_proxied());
        assert!(HttpTransport::new(Some("socks5h://127.0.0.1:9050"))
            .unwrap()
            .is_proxied());
    }

    #[test]
    fn test_bad_proxy_rejected() {
        assert!(matches!(
            HttpTransport::new(Some("not a url")),
            Err(NetError::Proxy(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        // Bind then drop so the port is known to be closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(None).unwrap();
        let peer = PeerAddress::parse(&addr.to_string()).unwrap();
        let result = transport.post(&peer, "/deliver", b"{}".to_vec()).await;
        assert!(matches!(result, Err(NetError::Unreachable(_))));
    }
}

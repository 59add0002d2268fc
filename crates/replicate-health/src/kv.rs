//! Consul agent HTTP client.
//!
//! Reads raw KV values (`GET /v1/kv/<key>?raw[&dc=<dc>]`) and the agent's
//! own datacenter (`GET /v1/agent/self`). Each request opens a fresh
//! HTTP/1 connection to the agent and is bounded by a timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use crate::config::Settings;
use crate::error::{KvError, KvResult};

/// Boxed future returned by [`KvBackend`] methods.
pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = KvResult<T>> + Send + 'a>>;

/// Read access to the coordination store, injected into the check for testability.
pub trait KvBackend: Send + Sync {
    /// The datacenter the local agent is configured for.
    fn agent_datacenter(&self) -> KvFuture<'_, String>;

    /// Read the raw value at `path`, optionally from another datacenter's view.
    fn read<'a>(&'a self, path: &'a str, datacenter: Option<&'a str>) -> KvFuture<'a, Bytes>;
}

#[derive(Deserialize)]
struct AgentSelf {
    #[serde(rename = "Config")]
    config: AgentConfig,
}

#[derive(Deserialize)]
struct AgentConfig {
    #[serde(rename = "Datacenter")]
    datacenter: String,
}

/// [`KvBackend`] talking HTTP/1.1 to a local Consul agent.
#[derive(Debug, Clone)]
pub struct HttpKvClient {
    /// Agent address as `host:port`.
    address: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpKvClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            token: None,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.consul_address.clone(), settings.timeout)
            .with_token(settings.token.clone())
    }

    /// Send an ACL token with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Issue a GET for `uri` (origin-form) and return the body of a 2xx response.
    async fn get(&self, uri: &str) -> KvResult<Bytes> {
        let result = tokio::time::timeout(self.timeout, self.send_get(uri)).await;
        match result {
            Ok(inner) => inner,
            Err(_) => {
                debug!(address = %self.address, %uri, "agent request timed out");
                Err(KvError::Timeout {
                    path: uri.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn send_get(&self, uri: &str) -> KvResult<Bytes> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| {
                debug!(error = %e, address = %self.address, "agent connection failed");
                KvError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                }
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| KvError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method("GET")
            .uri(uri)
            .header("host", self.address.as_str())
            .header("user-agent", concat!("replicate-health/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &self.token {
            builder = builder.header("x-consul-token", token.as_str());
        }
        let req = builder
            .body(http_body_util::Empty::<Bytes>::new())
            .map_err(|e| KvError::Request {
                path: uri.to_string(),
                reason: e.to_string(),
            })?;

        let resp = sender.send_request(req).await.map_err(|e| {
            debug!(error = %e, %uri, "agent request failed");
            KvError::Request {
                path: uri.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            debug!(%status, %uri, "agent returned non-2xx");
            return Err(KvError::Status {
                path: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| KvError::Request {
                path: uri.to_string(),
                reason: e.to_string(),
            })?
            .to_bytes();

        debug!(%uri, bytes = body.len(), "agent request ok");
        Ok(body)
    }
}

impl KvBackend for HttpKvClient {
    fn agent_datacenter(&self) -> KvFuture<'_, String> {
        Box::pin(async move {
            let uri = "/v1/agent/self";
            let body = self.get(uri).await?;
            parse_agent_datacenter(&body).map_err(|reason| KvError::InvalidResponse {
                path: uri.to_string(),
                reason,
            })
        })
    }

    fn read<'a>(&'a self, path: &'a str, datacenter: Option<&'a str>) -> KvFuture<'a, Bytes> {
        Box::pin(async move {
            let uri = kv_uri(path, datacenter);
            self.get(&uri).await
        })
    }
}

/// Build the origin-form URI for a raw KV read.
pub fn kv_uri(path: &str, datacenter: Option<&str>) -> String {
    let key: Vec<_> = path
        .trim_start_matches('/')
        .split('/')
        .map(urlencoding::encode)
        .collect();
    let mut uri = format!("/v1/kv/{}?raw", key.join("/"));
    if let Some(dc) = datacenter {
        uri.push_str("&dc=");
        uri.push_str(&urlencoding::encode(dc));
    }
    uri
}

/// Extract `Config.Datacenter` from an `/v1/agent/self` document.
pub fn parse_agent_datacenter(body: &[u8]) -> Result<String, String> {
    let doc: AgentSelf = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    if doc.config.datacenter.is_empty() {
        return Err("agent reports an empty datacenter".to_string());
    }
    Ok(doc.config.datacenter)
}

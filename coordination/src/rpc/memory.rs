//! In-process transport with fault injection
//!
//! Routes calls straight to registered handlers while still pushing every
//! request and reply through the JSON codec, so anything that would not
//! survive the wire fails here too. Endpoints can be taken down or slowed
//! to exercise unreachable and timeout paths without sockets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::protocol::{Reply, Request, RpcResponse};
use super::server::{dispatch, SharedHandler};
use super::transport::RpcTransport;
use crate::config::RpcConfig;
use crate::error::{EnvError, EnvResult};

/// Simulated network of manager endpoints
#[derive(Default)]
pub struct MemoryTransport {
    config: RpcConfig,
    routes: RwLock<HashMap<String, SharedHandler>>,
    /// Endpoints that refuse every call
    down: RwLock<HashSet<String>>,
    /// Extra delay before an endpoint answers
    latency: RwLock<HashMap<String, Duration>>,
}

impl MemoryTransport {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Create a shared reference to this transport
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Make `handler` reachable at `endpoint`
    pub async fn register(&self, endpoint: impl Into<String>, handler: SharedHandler) {
        self.routes.write().await.insert(endpoint.into(), handler);
    }

    /// Remove the route for `endpoint`
    pub async fn unregister(&self, endpoint: &str) {
        self.routes.write().await.remove(endpoint);
    }

    /// Take `endpoint` down (or bring it back)
    pub async fn set_down(&self, endpoint: &str, down: bool) {
        let mut set = self.down.write().await;
        if down {
            set.insert(endpoint.to_string());
        } else {
            set.remove(endpoint);
        }
    }

    /// Delay every answer from `endpoint` by `delay`
    pub async fn set_latency(&self, endpoint: &str, delay: Duration) {
        self.latency
            .write()
            .await
            .insert(endpoint.to_string(), delay);
    }

    async fn route(&self, endpoint: &str) -> EnvResult<SharedHandler> {
        if self.down.read().await.contains(endpoint) {
            return Err(EnvError::unreachable(endpoint, "endpoint is down"));
        }
        self.routes
            .read()
            .await
            .get(endpoint)
            .cloned()
            .ok_or_else(|| EnvError::unreachable(endpoint, "no such endpoint"))
    }
}

#[async_trait]
impl RpcTransport for MemoryTransport {
    async fn call(&self, endpoint: &str, request: Request) -> EnvResult<Reply> {
        let handler = self.route(endpoint).await?;
        let request: Request = serde_json::from_slice(&serde_json::to_vec(&request)?)?;
        let delay = self.latency.read().await.get(endpoint).copied();
        let timeout = self.config.call_timeout();
        debug!(endpoint, method = request.method(), "Memory call");

        let exchange = async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            dispatch(handler.as_ref(), request).await
        };
        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| EnvError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            })?;

        let response: RpcResponse = serde_json::from_slice(&serde_json::to_vec(&response)?)?;
        response.map_err(|e| e.into_env_error(endpoint))
    }

    async fn probe(&self, endpoint: &str) -> bool {
        self.route(endpoint).await.is_ok()
    }

    async fn disconnect(&self, _endpoint: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::server::RpcHandler;

    struct Ready;

    #[async_trait]
    impl RpcHandler for Ready {
        async fn handle(&self, request: Request) -> EnvResult<Reply> {
            match request {
                Request::IsReady => Ok(Reply::Bool(true)),
                _ => Err(EnvError::DuplicateName("A1".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_routes_and_errors() {
        let net = MemoryTransport::new(RpcConfig::default());
        net.register("w:1", Arc::new(Ready)).await;

        assert_eq!(net.call("w:1", Request::IsReady).await.unwrap(), Reply::Bool(true));
        assert!(matches!(
            net.call("w:1", Request::Candidates).await,
            Err(EnvError::DuplicateName(name)) if name == "A1"
        ));
        assert!(net.call("w:2", Request::IsReady).await.unwrap_err().is_unreachable());
    }

    #[tokio::test]
    async fn test_down_endpoint() {
        let net = MemoryTransport::new(RpcConfig::default());
        net.register("w:1", Arc::new(Ready)).await;
        net.set_down("w:1", true).await;
        assert!(!net.probe("w:1").await);
        assert!(net.call("w:1", Request::IsReady).await.is_err());
        net.set_down("w:1", false).await;
        assert!(net.probe("w:1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_past_timeout() {
        let config = RpcConfig {
            call_timeout_ms: 50,
            ..RpcConfig::default()
        };
        let net = MemoryTransport::new(config);
        net.register("w:1", Arc::new(Ready)).await;
        net.set_latency("w:1", Duration::from_millis(200)).await;
        assert!(matches!(
            net.call("w:1", Request::IsReady).await,
            Err(EnvError::Timeout { .. })
        ));
    }
}

//! Client side of the manager RPC
//!
//! [`TcpTransport`] keeps one pooled connection per endpoint. Every call is
//! bounded by the configured timeout. A connection that fails or times out
//! is evicted from the pool and the call fails; the next call to the same
//! endpoint dials a fresh connection. Nothing is retried silently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use super::protocol::{Reply, Request, RpcResponse};
use crate::config::RpcConfig;
use crate::error::{EnvError, EnvResult};

/// Largest frame either side accepts
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Codec used on both ends of a manager connection
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

/// Request/response delivery to manager endpoints
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send `request` to the manager at `endpoint` and await its reply
    async fn call(&self, endpoint: &str, request: Request) -> EnvResult<Reply>;

    /// Whether `endpoint` currently accepts connections
    async fn probe(&self, endpoint: &str) -> bool;

    /// Forget any pooled state for `endpoint`
    async fn disconnect(&self, endpoint: &str);
}

/// Shared reference to a transport
pub type SharedTransport = Arc<dyn RpcTransport>;

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// TCP transport with a per-endpoint connection pool
pub struct TcpTransport {
    config: RpcConfig,
    pool: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl TcpTransport {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            config,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Create a shared reference to this transport
    pub fn shared(self) -> SharedTransport {
        Arc::new(self)
    }

    /// Number of endpoints with a pooled connection
    pub async fn pooled(&self) -> usize {
        self.pool.lock().await.len()
    }

    async fn dial(&self, endpoint: &str) -> EnvResult<TcpStream> {
        let timeout = self.config.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| EnvError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            })?
            .map_err(|e| EnvError::unreachable(endpoint, e))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn connection(&self, endpoint: &str) -> EnvResult<Arc<Mutex<Connection>>> {
        if let Some(conn) = self.pool.lock().await.get(endpoint) {
            return Ok(conn.clone());
        }
        let stream = self.dial(endpoint).await?;
        debug!(endpoint, "Connected");
        let conn = Arc::new(Mutex::new(Framed::new(stream, frame_codec())));
        // Another task may have dialled concurrently; keep whichever landed first
        let mut pool = self.pool.lock().await;
        Ok(pool.entry(endpoint.to_string()).or_insert(conn).clone())
    }

    async fn evict(&self, endpoint: &str, conn: &Arc<Mutex<Connection>>) {
        let mut pool = self.pool.lock().await;
        if pool.get(endpoint).is_some_and(|c| Arc::ptr_eq(c, conn)) {
            pool.remove(endpoint);
        }
    }

    async fn exchange(conn: &Mutex<Connection>, payload: Bytes) -> std::io::Result<Bytes> {
        let mut conn = conn.lock().await;
        conn.send(payload).await?;
        match conn.next().await {
            Some(frame) => Ok(frame?.freeze()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            )),
        }
    }
}

#[async_trait]
impl RpcTransport for TcpTransport {
    async fn call(&self, endpoint: &str, request: Request) -> EnvResult<Reply> {
        let method = request.method();
        let payload = Bytes::from(serde_json::to_vec(&request)?);
        let conn = self.connection(endpoint).await?;
        let timeout = self.config.call_timeout();

        let frame = match tokio::time::timeout(timeout, Self::exchange(&conn, payload)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!(endpoint, method, error = %e, "Call failed, dropping connection");
                self.evict(endpoint, &conn).await;
                return Err(EnvError::unreachable(endpoint, e));
            }
            Err(_) => {
                // The reply may still arrive later and would desync the stream
                warn!(endpoint, method, ?timeout, "Call timed out, dropping connection");
                self.evict(endpoint, &conn).await;
                return Err(EnvError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                });
            }
        };

        let response: RpcResponse = serde_json::from_slice(&frame)?;
        response.map_err(|e| e.into_env_error(endpoint))
    }

    async fn probe(&self, endpoint: &str) -> bool {
        if self.pool.lock().await.contains_key(endpoint) {
            return true;
        }
        match self.connection(endpoint).await {
            Ok(_) => true,
            Err(e) => {
                debug!(endpoint, error = %e, "Probe failed");
                false
            }
        }
    }

    async fn disconnect(&self, endpoint: &str) {
        self.pool.lock().await.remove(endpoint);
    }
}

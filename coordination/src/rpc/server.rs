//! Server side of the manager RPC
//!
//! ```text
//!  TcpListener ──accept──▶ connection task ──frame──▶ RpcHandler::handle
//!       │                        ▲                          │
//!       │                        └───────── reply ◀─────────┘
//!       └── CancellationToken stops accepting; open connections finish
//!           their in-flight reply and close
//! ```
//!
//! Requests on one connection are answered in order. Separate connections
//! are served concurrently, so a caller fanning out over several pooled
//! connections never waits on itself.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::protocol::{Reply, Request, RpcResponse};
use super::transport::frame_codec;
use crate::error::{EnvError, EnvResult, ErrorKind, RemoteError};

/// Anything that can answer manager requests
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: Request) -> EnvResult<Reply>;
}

/// Shared reference to a handler
pub type SharedHandler = Arc<dyn RpcHandler>;

/// Run a request through `handler` and shape the result for the wire
pub async fn dispatch(handler: &dyn RpcHandler, request: Request) -> RpcResponse {
    let method = request.method();
    match handler.handle(request).await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            debug!(method, error = %e, "Request failed");
            Err(RemoteError::from(&e))
        }
    }
}

/// TCP listener for one manager
///
/// Binding and serving are separate steps so the manager can learn its
/// real endpoint (after binding port 0) before it is constructed.
pub struct RpcServer {
    listener: TcpListener,
    shutdown: CancellationToken,
}

impl RpcServer {
    /// Bind `addr`; use port 0 to let the OS pick
    pub async fn bind(addr: &str, shutdown: CancellationToken) -> EnvResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, shutdown })
    }

    /// The `host:port` actually bound
    pub fn local_endpoint(&self) -> EnvResult<String> {
        Ok(self.listener.local_addr()?.to_string())
    }

    /// Accept connections until the shutdown token fires, then wait for
    /// open connections to finish their current request
    pub async fn serve(self, handler: SharedHandler) -> EnvResult<()> {
        let endpoint = self.local_endpoint()?;
        info!(%endpoint, "Manager listening");
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%endpoint, %peer, "Accepted connection");
                        tracker.spawn(serve_connection(
                            stream,
                            handler.clone(),
                            self.shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(%endpoint, error = %e, "Accept failed"),
                },
            }
        }

        tracker.close();
        tracker.wait().await;
        info!(%endpoint, "Manager stopped");
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, handler: SharedHandler, shutdown: CancellationToken) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, frame_codec());

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = framed.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(error = %e, "Connection error");
                break;
            }
            None => break,
        };

        let response = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => dispatch(handler.as_ref(), request).await,
            Err(e) => Err(RemoteError {
                kind: ErrorKind::Internal,
                message: EnvError::from(e).to_string(),
            }),
        };

        let bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Could not encode reply");
                break;
            }
        };
        if let Err(e) = framed.send(Bytes::from(bytes)).await {
            debug!(error = %e, "Could not send reply");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;
    use crate::rpc::transport::{RpcTransport, TcpTransport};

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, request: Request) -> EnvResult<Reply> {
            match request {
                Request::IsReady => Ok(Reply::Bool(true)),
                Request::Handle { message } => Ok(Reply::Json(message)),
                Request::HostManager => Err(EnvError::NoHostLink),
                other => Err(EnvError::Remote(format!("unsupported: {}", other.method()))),
            }
        }
    }

    async fn start() -> (String, CancellationToken, tokio::task::JoinHandle<EnvResult<()>>) {
        let token = CancellationToken::new();
        let server = RpcServer::bind("127.0.0.1:0", token.clone()).await.unwrap();
        let endpoint = server.local_endpoint().unwrap();
        let handle = tokio::spawn(server.serve(Arc::new(Echo)));
        (endpoint, token, handle)
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let (endpoint, token, handle) = start().await;
        let transport = TcpTransport::new(RpcConfig::default());

        let reply = transport.call(&endpoint, Request::IsReady).await.unwrap();
        assert_eq!(reply, Reply::Bool(true));

        let message = serde_json::json!({"payload": [0, 255, 7], "note": "ünïcode"});
        let reply = transport
            .call(
                &endpoint,
                Request::Handle {
                    message: message.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, Reply::Json(message));
        assert_eq!(transport.pooled().await, 1);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_typed_error_crosses_wire() {
        let (endpoint, token, handle) = start().await;
        let transport = TcpTransport::new(RpcConfig::default());

        let err = transport
            .call(&endpoint, Request::HostManager)
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::NoHostLink));

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(RpcConfig::default());
        assert!(!transport.probe(&endpoint).await);
        let err = transport.call(&endpoint, Request::IsReady).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(transport.pooled().await, 0);
    }
}

//! Worker pools
//!
//! A [`WorkerLauncher`] brings worker environments up, makes the master
//! manager reachable to them, and tears everything down again. Two
//! implementations:
//!
//! - [`ProcessLauncher`]: one OS process per worker, re-executing a binary
//!   with `worker --listen <addr>`
//! - [`TaskLauncher`]: workers hosted as tokio tasks in the current process,
//!   either on loopback TCP or on a [`MemoryTransport`]
//!
//! `terminate` never fails: it is the last step of `destroy` and must run
//! even after every `stop` call went wrong.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentRegistry;
use crate::config::{MultiEnvConfig, RpcConfig, ENV_CALL_TIMEOUT_MS};
use crate::error::{EnvError, EnvResult};
use crate::manager::LocalManager;
use crate::rpc::memory::MemoryTransport;
use crate::rpc::server::{RpcServer, SharedHandler};
use crate::rpc::transport::{SharedTransport, TcpTransport};

/// Endpoint the master manager answers on inside a [`MemoryTransport`]
pub const MEMORY_MASTER_ENDPOINT: &str = "master:0";

/// Grace period for a worker process to exit after being killed
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Brings worker environments up and down
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Transport that reaches every endpoint this launcher creates
    fn transport(&self) -> SharedTransport;

    /// Reserve the master endpoint and return it
    async fn bind_master(&mut self) -> EnvResult<String>;

    /// Start answering on the endpoint from [`bind_master`](Self::bind_master)
    async fn serve_master(&mut self, handler: SharedHandler) -> EnvResult<()>;

    /// Start `count` more workers; returns their endpoints in launch order
    async fn launch(&mut self, count: usize) -> EnvResult<Vec<String>>;

    /// Stop every worker and the master, whatever state they are in
    async fn terminate(&mut self);
}

// ── worker server ──

/// A local manager bound to a TCP listener, ready to serve
pub struct WorkerServer {
    server: RpcServer,
    manager: Arc<LocalManager>,
}

impl WorkerServer {
    /// Bind `listen` and build the manager around the endpoint actually bound
    pub async fn bind(listen: &str, registry: AgentRegistry, rpc: RpcConfig) -> EnvResult<Self> {
        let shutdown = CancellationToken::new();
        let server = RpcServer::bind(listen, shutdown.clone()).await?;
        let endpoint = server.local_endpoint()?;
        let transport = TcpTransport::new(rpc.clone()).shared();
        let manager = LocalManager::new(endpoint, registry, transport, rpc, shutdown).shared();
        Ok(Self { server, manager })
    }

    pub fn endpoint(&self) -> &str {
        self.manager.endpoint()
    }

    /// Fires when the manager is stopped
    pub fn shutdown_token(&self) -> CancellationToken {
        self.manager.shutdown_token()
    }

    /// Serve until the manager is stopped
    pub async fn serve(self) -> EnvResult<()> {
        self.server.serve(self.manager).await
    }
}

/// Run one worker environment on `listen` until it is stopped
pub async fn serve_worker(listen: &str, registry: AgentRegistry, rpc: RpcConfig) -> EnvResult<()> {
    WorkerServer::bind(listen, registry, rpc).await?.serve().await
}

// ── master hosting over TCP ──

#[derive(Default)]
struct TcpMaster {
    pending: Option<RpcServer>,
    task: Option<JoinHandle<EnvResult<()>>>,
    shutdown: CancellationToken,
}

impl TcpMaster {
    async fn bind(&mut self, addr: &str) -> EnvResult<String> {
        let server = RpcServer::bind(addr, self.shutdown.clone()).await?;
        let endpoint = server.local_endpoint()?;
        self.pending = Some(server);
        Ok(endpoint)
    }

    fn serve(&mut self, handler: SharedHandler) -> EnvResult<()> {
        let server = self
            .pending
            .take()
            .ok_or_else(|| EnvError::Launch("master endpoint was not bound".into()))?;
        self.task = Some(tokio::spawn(server.serve(handler)));
        Ok(())
    }

    async fn stop(&mut self) {
        self.shutdown.cancel();
        self.pending = None;
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Master server failed"),
                Err(e) => warn!(error = %e, "Master server task panicked"),
            }
        }
    }
}

/// Pick a loopback port nobody is listening on right now
fn free_loopback_addr() -> EnvResult<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.to_string())
}

// ── process launcher ──

/// One OS process per worker
pub struct ProcessLauncher {
    program: PathBuf,
    master_addr: String,
    worker_addrs: Vec<String>,
    rpc: RpcConfig,
    transport: SharedTransport,
    master: TcpMaster,
    children: Vec<(String, Child)>,
}

impl ProcessLauncher {
    /// Launch workers by running `program worker --listen <addr>`
    pub fn new(program: impl Into<PathBuf>, config: &MultiEnvConfig) -> Self {
        Self {
            program: program.into(),
            master_addr: config.master_addr.clone(),
            worker_addrs: config.worker_addrs.clone(),
            rpc: config.rpc.clone(),
            transport: TcpTransport::new(config.rpc.clone()).shared(),
            master: TcpMaster::default(),
            children: Vec::new(),
        }
    }

    /// Launch workers by re-executing the running binary
    pub fn current_exe(config: &MultiEnvConfig) -> EnvResult<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, config))
    }

    fn next_addr(&self) -> EnvResult<String> {
        match self.worker_addrs.get(self.children.len()) {
            Some(addr) => Ok(addr.clone()),
            None => free_loopback_addr(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    fn transport(&self) -> SharedTransport {
        self.transport.clone()
    }

    async fn bind_master(&mut self) -> EnvResult<String> {
        let addr = self.master_addr.clone();
        self.master.bind(&addr).await
    }

    async fn serve_master(&mut self, handler: SharedHandler) -> EnvResult<()> {
        self.master.serve(handler)
    }

    async fn launch(&mut self, count: usize) -> EnvResult<Vec<String>> {
        let mut endpoints = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = self.next_addr()?;
            let mut cmd = Command::new(&self.program);
            cmd.arg("worker")
                .arg("--listen")
                .arg(&addr)
                .env(ENV_CALL_TIMEOUT_MS, self.rpc.call_timeout_ms.to_string())
                .stdin(Stdio::null())
                .kill_on_drop(true);
            let child = cmd.spawn().map_err(|e| {
                EnvError::Launch(format!("{} worker --listen {addr}: {e}", self.program.display()))
            })?;
            info!(worker = %addr, pid = ?child.id(), "Worker process launched");
            self.children.push((addr.clone(), child));
            endpoints.push(addr);
        }
        Ok(endpoints)
    }

    async fn terminate(&mut self) {
        for (addr, mut child) in self.children.drain(..) {
            if let Err(e) = child.start_kill() {
                debug!(worker = %addr, error = %e, "Worker already gone");
            }
            match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!(worker = %addr, %status, "Worker reaped"),
                Ok(Err(e)) => warn!(worker = %addr, error = %e, "Could not reap worker"),
                Err(_) => warn!(worker = %addr, "Worker did not exit in time"),
            }
        }
        self.master.stop().await;
        info!("Process pool terminated");
    }
}

// ── task launcher ──

enum TaskNetwork {
    Tcp(SharedTransport),
    Memory(Arc<MemoryTransport>),
}

struct TaskWorker {
    endpoint: String,
    shutdown: CancellationToken,
    task: Option<JoinHandle<EnvResult<()>>>,
}

/// Workers hosted as tokio tasks inside the current process
pub struct TaskLauncher {
    registry: AgentRegistry,
    rpc: RpcConfig,
    network: TaskNetwork,
    master: TcpMaster,
    workers: Vec<TaskWorker>,
}

impl TaskLauncher {
    /// Workers on loopback TCP, each on an OS-assigned port
    pub fn tcp(registry: AgentRegistry, rpc: RpcConfig) -> Self {
        let transport = TcpTransport::new(rpc.clone()).shared();
        Self {
            registry,
            rpc,
            network: TaskNetwork::Tcp(transport),
            master: TcpMaster::default(),
            workers: Vec::new(),
        }
    }

    /// Workers registered on `net` as `worker:0`, `worker:1`, …
    pub fn memory(registry: AgentRegistry, net: Arc<MemoryTransport>) -> Self {
        Self {
            registry,
            rpc: RpcConfig::default(),
            network: TaskNetwork::Memory(net),
            master: TcpMaster::default(),
            workers: Vec::new(),
        }
    }

    /// Endpoint of the `index`-th in-memory worker
    pub fn memory_endpoint(index: usize) -> String {
        format!("worker:{index}")
    }
}

#[async_trait]
impl WorkerLauncher for TaskLauncher {
    fn transport(&self) -> SharedTransport {
        match &self.network {
            TaskNetwork::Tcp(transport) => transport.clone(),
            TaskNetwork::Memory(net) => net.clone() as SharedTransport,
        }
    }

    async fn bind_master(&mut self) -> EnvResult<String> {
        match &self.network {
            TaskNetwork::Tcp(_) => self.master.bind("127.0.0.1:0").await,
            TaskNetwork::Memory(_) => Ok(MEMORY_MASTER_ENDPOINT.to_string()),
        }
    }

    async fn serve_master(&mut self, handler: SharedHandler) -> EnvResult<()> {
        match &self.network {
            TaskNetwork::Tcp(_) => self.master.serve(handler),
            TaskNetwork::Memory(net) => {
                net.register(MEMORY_MASTER_ENDPOINT, handler).await;
                Ok(())
            }
        }
    }

    async fn launch(&mut self, count: usize) -> EnvResult<Vec<String>> {
        let mut endpoints = Vec::with_capacity(count);
        for _ in 0..count {
            let worker = match &self.network {
                TaskNetwork::Tcp(_) => {
                    let server =
                        WorkerServer::bind("127.0.0.1:0", self.registry.clone(), self.rpc.clone())
                            .await?;
                    TaskWorker {
                        endpoint: server.endpoint().to_string(),
                        shutdown: server.shutdown_token(),
                        task: Some(tokio::spawn(server.serve())),
                    }
                }
                TaskNetwork::Memory(net) => {
                    let endpoint = Self::memory_endpoint(self.workers.len());
                    let shutdown = CancellationToken::new();
                    let manager = LocalManager::new(
                        endpoint.clone(),
                        self.registry.clone(),
                        net.clone(),
                        self.rpc.clone(),
                        shutdown.clone(),
                    )
                    .shared();
                    net.register(endpoint.clone(), manager).await;
                    TaskWorker {
                        endpoint,
                        shutdown,
                        task: None,
                    }
                }
            };
            debug!(worker = %worker.endpoint, "Worker task launched");
            endpoints.push(worker.endpoint.clone());
            self.workers.push(worker);
        }
        Ok(endpoints)
    }

    async fn terminate(&mut self) {
        for mut worker in self.workers.drain(..) {
            worker.shutdown.cancel();
            if let TaskNetwork::Memory(net) = &self.network {
                net.unregister(&worker.endpoint).await;
            }
            if let Some(task) = worker.task.take() {
                if let Err(e) = task.await {
                    warn!(worker = %worker.endpoint, error = %e, "Worker task panicked");
                }
            }
        }
        match &self.network {
            TaskNetwork::Tcp(_) => self.master.stop().await,
            TaskNetwork::Memory(net) => net.unregister(MEMORY_MASTER_ENDPOINT).await,
        }
        info!("Task pool terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AgentAddress;
    use crate::rpc::protocol::{Reply, Request};

    #[tokio::test]
    async fn test_memory_launcher_routes_and_terminates() {
        let net = MemoryTransport::new(RpcConfig::default()).shared();
        let mut launcher = TaskLauncher::memory(AgentRegistry::new(), net.clone());
        let endpoints = launcher.launch(2).await.unwrap();
        assert_eq!(endpoints, vec!["worker:0", "worker:1"]);

        let transport = launcher.transport();
        let reply = transport.call("worker:1", Request::IsReady).await.unwrap();
        assert_eq!(reply, Reply::Bool(false));

        // Memory endpoints must survive the address codec like real ones
        let host = AgentAddress::manager(launcher.bind_master().await.unwrap());
        let reply = transport
            .call("worker:0", Request::SetHostManager { address: host.clone() })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Unit);
        let reply = transport.call("worker:0", Request::HostManager).await.unwrap();
        assert_eq!(reply, Reply::Host(Some(host)));

        launcher.terminate().await;
        assert!(!transport.probe("worker:0").await);
    }

    #[tokio::test]
    async fn test_tcp_launcher_serves_workers() {
        let mut launcher = TaskLauncher::tcp(AgentRegistry::new(), RpcConfig::default());
        let endpoints = launcher.launch(1).await.unwrap();
        let transport = launcher.transport();
        assert!(transport.probe(&endpoints[0]).await);
        launcher.terminate().await;
    }

    #[tokio::test]
    async fn test_process_launcher_reports_spawn_failure() {
        let config = MultiEnvConfig::default();
        let mut launcher = ProcessLauncher::new("/definitely/not/a/binary", &config);
        let err = launcher.launch(1).await.unwrap_err();
        assert!(matches!(err, EnvError::Launch(_)));
        launcher.terminate().await;
    }
}

//! Manager RPC: wire vocabulary, transports and the server loop

pub mod memory;
pub mod protocol;
pub mod server;
pub mod transport;

pub use memory::MemoryTransport;
pub use protocol::{
    ActOutcome, AgentInfo, Reply, Request, RpcResponse, SpawnedAgent, TriggerResult,
};
pub use server::{dispatch, RpcHandler, RpcServer, SharedHandler};
pub use transport::{frame_codec, RpcTransport, SharedTransport, TcpTransport};

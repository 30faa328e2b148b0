// rpcmux-node: core routing subsystem of the rpcmux JSON-RPC multiplexer.
//
// The mux sits between clients and dynamically registered worker services:
// workers declare the methods they serve over rpcz.declare, clients call
// methods without knowing which worker answers, and mux instances federate
// through a shared message bus so any mux can forward to any peer.
//
// The transport (HTTP/WebSocket framing, auth, TLS) lives outside this
// crate behind the `RpcSession` / `SessionContext` seam; the outbound HTTP
// client for peer calls lives behind `PeerClient` / `PeerClientFactory`.

pub mod app;
pub mod client;
pub mod config;
pub mod mq;
pub mod routing;
pub mod session;

pub use app::{App, AuthInfo, SessionContext, DEFAULT_NAMESPACE};
pub use client::{PeerClient, PeerClientFactory};
pub use config::{AppConfig, MqConfig, RouterOptions, ServerConfig};
pub use mq::{MemoryMqBroker, MqActor, MqChunk, MqClient, MqItem};
pub use routing::{RemoteService, Router, Service, ServiceStatus};
pub use session::{RpcSession, SessionSendError};

// JSON-RPC 2.0 message model
//
// This crate defines the wire-level contract shared by every rpcmux
// component: the tagged message sum (Request / Notify / Result / Error),
// message ids, and the error object with the code assignments used across
// the mux. Transport and routing layers build on these types; nothing here
// performs IO.

pub mod error;
pub mod message;

pub use error::{ErrorKind, RpcError};
pub use message::{Message, MsgId};

//! chainwatch-core: foundation traits and types for ChainWatch.
//!
//! # Overview
//!
//! ChainWatch keeps a Solana-style JSON-RPC subscription alive across
//! endpoint failures and wraps flaky RPC calls in exponential backoff. The
//! core crate defines:
//!
//! - [`RpcTransport`]: the async request/response trait every transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`TransportError`]: structured error type
//! - [`HealthStatus`]: endpoint liveness as seen by a transport
//! - [`policy`] module: the backoff retry executor

pub mod error;
pub mod policy;
pub mod request;
pub mod transport;

pub use error::TransportError;
pub use policy::{retry_with_backoff, RetryConfig, RetryPolicy};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use transport::{HealthStatus, RpcTransport};

//! chainwatch-ws: JSON-RPC subscriptions over WebSocket with endpoint failover.
//!
//! # Features
//! - Primary endpoint with a single backup; failover on open failure or loss
//! - Subscription table that survives failover (auto re-register on open)
//! - One-off request/response calls multiplexed over the same connection
//! - Pluggable [`Connector`] seam (tokio-tungstenite by default)

pub mod client;
pub mod config;
pub mod connector;
pub mod message;
pub mod state;
pub mod subscriptions;

#[cfg(test)]
mod mock;

pub use client::{FailoverClient, Subscription};
pub use config::ClientConfig;
pub use connector::{Connection, Connector, TungsteniteConnector};
pub use message::Inbound;
pub use state::{ConnectionState, EndpointRole};
pub use subscriptions::SubscriptionHandle;

//! chainwatch-http: HTTP JSON-RPC transport with backoff retry.
//!
//! ```rust,no_run
//! use chainwatch_http::HttpRpcClient;
//!
//! # async fn example() -> Result<(), chainwatch_core::TransportError> {
//! let client = HttpRpcClient::default_for("https://api.mainnet-beta.solana.com")?;
//! let slot = client.latest_slot().await?;
//! println!("tip: {slot}");
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient, LatestBlockhash};

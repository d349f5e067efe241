//! Reliability policies applied around RPC calls.
//!
//! ```text
//! Request → [RetryPolicy] → [Transport]
//! ```

pub mod retry;

pub use retry::{retry_with_backoff, RetryConfig, RetryPolicy};

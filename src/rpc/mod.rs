//! Chain RPC access
//!
//! - `client`: the `ChainClient` trait and its HTTP JSON-RPC implementation
//! - `retry`: per-call deadlines and linear retry

pub mod client;
#[cfg(test)]
pub mod mock;
pub mod retry;

pub use client::{ChainClient, HttpRpcClient};
pub use retry::{retry_linear, with_deadline, LinearBackoff};

//! Chain Sweeper Library
//!
//! Watches accounts across many EVM JSON-RPC backends and sweeps any
//! spendable balance to a single destination address.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod persist;
pub mod rpc;
pub mod sweep;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};

//! Backend management
//!
//! - `registry`: canonical table of chain endpoints
//! - `health`: persisted per-backend availability and error counters
//! - `pool`: lazily-connected, cached chain clients

pub mod health;
pub mod pool;
pub mod registry;

pub use health::{BackendHealth, HealthStore, HealthSummary};
pub use pool::{ClientFactory, ConnectionPool, HttpClientFactory};
pub use registry::{BackendDescriptor, BackendRegistry, NetworkClass, NetworkSelection};

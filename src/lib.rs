//! Service Monitor Library
//!
//! Keeps a persisted registry of external services and probes whether
//! each one currently answers over the network.

pub mod config;
pub mod errors;
pub mod prober;
pub mod seed;
pub mod service;
pub mod storage;
pub mod store;
pub mod time_ago;

pub use config::Config;
pub use errors::{MonitorError, Result};
pub use prober::{HttpProber, ProbeOutcome, Prober};
pub use service::{Lifecycle, Reachability, Service, ServiceDraft, KNOWN_CLOUD_PROVIDERS};
pub use storage::{JsonFileStorage, MemoryStorage, ServiceRepository};
pub use store::ServiceStore;
pub use time_ago::{time_ago, time_ago_now};

//! Best-effort reachability probing

use crate::errors::{MonitorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
}

impl ProbeOutcome {
    pub fn now(reachable: bool) -> Self {
        Self {
            reachable,
            checked_at: Utc::now(),
        }
    }
}

/// Seam between the store and the network.
///
/// Implementations never fail: every error is reduced to `reachable = false`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Probes a URL with a single bare GET request.
///
/// Any response at all, including 4xx and 5xx, counts as reachable; only
/// transport-level failures count as unreachable. The body and headers of
/// the response are never read.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("service_monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) => {
                debug!("Probe of {} answered with {}", url, response.status());
                ProbeOutcome::now(true)
            }
            Err(e) => {
                warn!("Probe of {} failed: {}", url, e);
                ProbeOutcome::now(false)
            }
        }
    }
}

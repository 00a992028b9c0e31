//! # Network Association Gate
//!
//! A cycle only opens a transport session once the link is up. On the node
//! this is the radio reporting "associated"; on a host it is approximated by
//! the upload host resolving to at least one address.
//!
//! The gate polls every [`LINK_POLL_INTERVAL`] and gives up after the
//! configured wait, which ends the cycle with a connection failure.

use crate::error::{NodeError, NodeResult};
use std::time::{Duration, Instant};
use tokio::net::lookup_host;
use tracing::{debug, info};

pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Waits for the route to the upload host.
#[derive(Debug, Clone)]
pub struct LinkGate {
    host: String,
    port: u16,
    max_wait: Duration,
}

impl LinkGate {
    pub fn new(host: impl Into<String>, port: u16, max_wait: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            max_wait,
        }
    }

    /// Poll until the link is up, returning how long that took.
    ///
    /// At least one attempt is always made, even with a zero wait.
    pub async fn wait_for_link(&self) -> NodeResult<Duration> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.resolve_once().await {
                Ok(()) => {
                    let waited = started.elapsed();
                    info!(host = %self.host, attempts, waited_ms = waited.as_millis() as u64, "Network link up");
                    return Ok(waited);
                }
                Err(reason) => {
                    if started.elapsed() + LINK_POLL_INTERVAL > self.max_wait {
                        return Err(NodeError::Connection(format!(
                            "link to {} not up after {} attempts: {}",
                            self.host, attempts, reason
                        )));
                    }
                    debug!(host = %self.host, attempts, reason = %reason, "Waiting for network link");
                    tokio::time::sleep(LINK_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn resolve_once(&self) -> Result<(), String> {
        let mut addrs = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| e.to_string())?;
        match addrs.next() {
            Some(_) => Ok(()),
            None => Err("host resolved to no addresses".to_string()),
        }
    }
}

//! Background poller that watches registered peers and drives takeover.
//!
//! Each cycle probes every registered healthcheck address. Three
//! consecutive failures trigger a takeover, after double-checking that the
//! content address is really down and the master key is available. A
//! healthcheck that answers while a takeover is active means the original
//! instance is back (its healthcheck address is never taken over), so the
//! content address is released automatically.
//!
//! Polling slows down when everything is quiet and speeds up around
//! failures and recoveries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::custody::CustodyManager;
use crate::registry::store::RegistryStore;
use crate::takeover::TakeoverManager;
use crate::types::Result;

/// Consecutive healthcheck failures before a takeover is attempted.
pub const FAIL_THRESHOLD: u32 = 3;

/// Poll interval while all peers are healthy.
pub const HEALTHY_INTERVAL: Duration = Duration::from_secs(300);

/// Poll interval around a recent failure or recovery.
pub const FAST_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Poll interval once a takeover has settled in.
pub const LONG_FAIL_INTERVAL: Duration = Duration::from_secs(1800);

/// How long a probe waits before calling a peer unreachable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What one healthcheck observation meant for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Healthcheck answered, nothing to change.
    Healthy,
    /// Healthcheck answered after failures or during a takeover; the
    /// takeover (if any) was released and counters reset.
    Recovered,
    /// Healthcheck failed but the threshold is not reached yet.
    Failing(u32),
    /// Threshold reached; the caller should verify the content address
    /// and engage the takeover.
    TakeoverDue,
    /// Threshold reached but a takeover is already active.
    StillDown,
}

pub struct PeerPoller {
    registry: Arc<RegistryStore>,
    takeover: Arc<TakeoverManager>,
    custody: Arc<CustodyManager>,
    client: reqwest::Client,
}

impl PeerPoller {
    /// Probes go through the tor SOCKS proxy when one is configured;
    /// without it only directly routable addresses are checkable.
    pub fn new(
        registry: Arc<RegistryStore>,
        takeover: Arc<TakeoverManager>,
        custody: Arc<CustodyManager>,
        tor_socks: Option<&str>,
    ) -> Self {
        let mut builder = reqwest::Client::builder().timeout(PROBE_TIMEOUT);
        if let Some(url) = tor_socks {
            match reqwest::Proxy::all(url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => warn!(proxy = %url, error = %e, "invalid tor socks proxy, probing directly"),
            }
        }
        Self {
            registry,
            takeover,
            custody,
            client: builder.build().unwrap_or_default(),
        }
    }

    /// Fold one healthcheck observation into the registry.
    ///
    /// Release on recovery happens here; takeover does not — the caller
    /// still owes the content-address double check before engaging.
    pub fn record(&self, content_address: &str, healthcheck_ok: bool) -> Result<PollStep> {
        let entry = match self.registry.find(content_address)? {
            Some(e) => e,
            None => return Ok(PollStep::Healthy),
        };

        if healthcheck_ok {
            if entry.takeover_active {
                // The healthcheck address is independent of the takeover,
                // so it answering means the original instance is back.
                info!(address = %content_address, "peer recovered, releasing takeover");
                self.takeover.release(content_address)?;
                self.registry.record_healthcheck(content_address, true)?;
                return Ok(PollStep::Recovered);
            }
            let was_failing = entry.fail_count > 0;
            self.registry.record_healthcheck(content_address, true)?;
            return Ok(if was_failing {
                PollStep::Recovered
            } else {
                PollStep::Healthy
            });
        }

        self.registry.record_healthcheck(content_address, false)?;
        let fail_count = entry.fail_count + 1;
        if fail_count < FAIL_THRESHOLD {
            debug!(address = %content_address, fail_count, "healthcheck failed");
            return Ok(PollStep::Failing(fail_count));
        }
        if entry.takeover_active {
            return Ok(PollStep::StillDown);
        }
        Ok(PollStep::TakeoverDue)
    }

    async fn reachable(&self, address: &str) -> bool {
        let url = format!("http://{address}/");
        match self.client.get(&url).send().await {
            Ok(resp) => {
                debug!(address, status = %resp.status(), "peer probe");
                true
            }
            Err(e) => {
                debug!(address, error = %e, "peer probe failed");
                false
            }
        }
    }

    /// One pass over the registry. Returns how long to sleep before the
    /// next pass.
    pub async fn poll_once(&self) -> Result<Duration> {
        let entries = self.registry.load()?;
        if entries.is_empty() {
            return Ok(HEALTHY_INTERVAL);
        }

        let mut interval = HEALTHY_INTERVAL;
        for entry in entries {
            let hc_ok = self.reachable(&entry.healthcheck_address).await;
            match self.record(&entry.content_address, hc_ok)? {
                PollStep::Healthy => {}
                PollStep::Recovered | PollStep::Failing(_) => {
                    interval = interval.min(FAST_POLL_INTERVAL);
                }
                PollStep::StillDown => {
                    interval = interval.min(LONG_FAIL_INTERVAL);
                }
                PollStep::TakeoverDue => {
                    interval = interval.min(FAST_POLL_INTERVAL);
                    if !self.custody.is_unlocked() {
                        warn!(
                            address = %entry.content_address,
                            "takeover due but master key is locked; deferring"
                        );
                    } else if self.reachable(&entry.content_address).await {
                        // The healthcheck endpoint is down but the site
                        // itself still answers; leave it alone.
                        info!(
                            address = %entry.content_address,
                            "healthcheck down but content reachable, not taking over"
                        );
                    } else if let Err(e) = self.takeover.takeover(&entry.content_address) {
                        error!(address = %entry.content_address, error = %e, "takeover failed");
                    }
                }
            }
        }
        Ok(interval)
    }

    /// Poll forever; errors are logged and retried on the next cycle.
    pub async fn run(self: Arc<Self>) {
        info!("peer healthcheck poller started");
        loop {
            let interval = match self.poll_once().await {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "poller pass failed");
                    Duration::from_secs(60)
                }
            };
            tokio::time::sleep(interval).await;
        }
    }
}

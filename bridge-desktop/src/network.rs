//! Connectivity via TCP reachability probes.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::debug;

/// Public DNS resolver; reachable from nearly every network that has a route out.
const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:53";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Reports "connected" when a TCP handshake with the probe address succeeds.
///
/// The link type is always [`NetworkType::Other`]; telling WiFi from
/// Ethernet needs per-OS APIs.
#[derive(Debug, Clone)]
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    poll_interval: Duration,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        Self::with_probe(DEFAULT_PROBE_ADDR, DEFAULT_POLL_INTERVAL)
    }

    /// Probe `host:port`, re-checking every `poll_interval` for change streams.
    pub fn with_probe(probe_addr: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            probe_addr: probe_addr.into(),
            poll_interval,
        }
    }

    async fn probe(&self) -> NetworkInfo {
        let connect = TcpStream::connect(self.probe_addr.as_str());
        let attempt = time::timeout(PROBE_TIMEOUT, connect).await;
        let reachable = matches!(attempt, Ok(Ok(_)));
        debug!(probe = %self.probe_addr, reachable, "Connectivity probed");

        if reachable {
            NetworkInfo::connected(NetworkType::Other)
        } else {
            NetworkInfo::disconnected()
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.probe().await)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        let mut ticks = time::interval(self.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Box::new(PollingChanges {
            monitor: self.clone(),
            ticks,
            last: None,
        }))
    }
}

/// Yields the first probe result, then only transitions.
struct PollingChanges {
    monitor: DesktopNetworkMonitor,
    ticks: Interval,
    last: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for PollingChanges {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            self.ticks.tick().await;
            let info = self.monitor.probe().await;
            if self.last.replace(info.status) != Some(info.status) {
                return Some(info);
            }
        }
    }
}

//! Connectivity reporting.
//!
//! The sync queue asks the monitor before each drain and listens for change
//! notifications so a queue parked while offline drains as soon as the link
//! returns.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    /// Link type cannot be determined on this platform
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The platform could not answer; treated as offline by the queue.
    Indeterminate,
}

/// Snapshot of the current link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    /// `None` while disconnected
    pub network_type: Option<NetworkType>,
}

impl NetworkInfo {
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == NetworkStatus::Connected
    }
}

/// Host connectivity source.
///
/// A monitor is optional: without one the queue assumes it is online and
/// relies on transport errors to back off.
///
/// ```ignore
/// let mut changes = monitor.subscribe_changes().await?;
/// while let Some(info) = changes.next().await {
///     if info.is_connected() {
///         queue.request_drain(DrainTrigger::Connectivity);
///     }
/// }
/// ```
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// `false` when the monitor errors as well as when it reports offline.
    async fn is_connected(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_connected())
            .unwrap_or(false)
    }

    /// Stream that yields whenever the status changes.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Next status change, or `None` once the monitor shuts down.
    async fn next(&mut self) -> Option<NetworkInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    enum Probe {
        Answer(NetworkInfo),
        Broken,
    }

    struct Ended;

    #[async_trait]
    impl NetworkChangeStream for Ended {
        async fn next(&mut self) -> Option<NetworkInfo> {
            None
        }
    }

    #[async_trait]
    impl NetworkMonitor for Probe {
        async fn get_network_info(&self) -> Result<NetworkInfo> {
            match self {
                Probe::Answer(info) => Ok(info.clone()),
                Probe::Broken => Err(BridgeError::NotAvailable("no route table".to_string())),
            }
        }

        async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
            Ok(Box::new(Ended))
        }
    }

    #[test]
    fn test_info_constructors() {
        let online = NetworkInfo::connected(NetworkType::WiFi);
        assert!(online.is_connected());
        assert_eq!(online.network_type, Some(NetworkType::WiFi));

        let offline = NetworkInfo::disconnected();
        assert!(!offline.is_connected());
        assert_eq!(offline.network_type, None);

        let unknown = NetworkInfo {
            status: NetworkStatus::Indeterminate,
            network_type: None,
        };
        assert!(!unknown.is_connected());
    }

    #[tokio::test]
    async fn test_is_connected_default() {
        assert!(Probe::Answer(NetworkInfo::connected(NetworkType::Ethernet))
            .is_connected()
            .await);
        assert!(!Probe::Answer(NetworkInfo::disconnected()).is_connected().await);
        assert!(!Probe::Broken.is_connected().await);

        let mut changes = Probe::Broken.subscribe_changes().await.unwrap();
        assert!(changes.next().await.is_none());
    }
}

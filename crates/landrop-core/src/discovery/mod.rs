//! Device discovery for Landrop.
//!
//! The [`DeviceDirectory`] publishes this device on the local network and
//! maintains a live registry of discovered peers, keyed by their stable
//! device identifier. Discovery is best-effort and lossy: missed events are
//! not retried, and staleness is corrected by the next update or removal
//! event from the network.
//!
//! Consumers observe registry changes through a typed event subscription
//! ([`DeviceDirectory::subscribe`]) rather than ad-hoc callbacks; dropping
//! the receiver unsubscribes.

pub mod mdns;

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::Result;

pub use mdns::{AdvertiseParams, MdnsAdvertiser, MdnsBrowser, ServiceChange, ServiceRecord};

/// A peer device visible on the local network.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDevice {
    /// Stable device identifier
    pub device_id: String,
    /// Display name
    pub device_name: String,
    /// Resolved IPv4 address, when known
    #[serde(rename = "ip")]
    pub address: Option<IpAddr>,
    /// Transfer server port
    pub port: u16,
    /// Icon hint (e.g. "laptop")
    pub icon: String,
    /// Device kind (e.g. "DESKTOP")
    pub kind: String,
    /// When the last discovery event for this peer arrived
    pub last_seen: DateTime<Utc>,
    /// Full mDNS instance name, used to correlate removal events
    #[serde(skip)]
    fullname: Option<String>,
}

impl PeerDevice {
    /// Construct a peer record by hand, e.g. for a device at a known address
    /// that never appeared in a scan.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        address: Option<IpAddr>,
        port: u16,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            address,
            port,
            icon: "device".to_string(),
            kind: "UNKNOWN".to_string(),
            last_seen: Utc::now(),
            fullname: None,
        }
    }

    fn from_record(record: &ServiceRecord, device_id: String) -> Self {
        Self {
            device_id,
            device_name: record.device_name.clone(),
            address: record.address,
            port: record.port,
            icon: record.icon.clone().unwrap_or_else(|| "device".to_string()),
            kind: record.kind.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            last_seen: Utc::now(),
            fullname: Some(record.fullname.clone()),
        }
    }

    fn merge(&mut self, record: &ServiceRecord) {
        self.device_name = record.device_name.clone();
        if record.address.is_some() {
            self.address = record.address;
        }
        if record.port != 0 {
            self.port = record.port;
        }
        if let Some(icon) = &record.icon {
            self.icon = icon.clone();
        }
        if let Some(kind) = &record.kind {
            self.kind = kind.clone();
        }
        self.fullname = Some(record.fullname.clone());
        self.last_seen = Utc::now();
    }
}

/// A change to the peer registry.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A new peer appeared
    Discovered(PeerDevice),
    /// A known peer's record changed
    Updated(PeerDevice),
    /// A peer withdrew or went away
    Removed(PeerDevice),
}

struct BrowseTask {
    handle: JoinHandle<()>,
}

/// Advertises this device and maintains the registry of discovered peers.
///
/// The directory exclusively owns the registry; other components read it
/// through [`get_device`](Self::get_device) and
/// [`list_devices`](Self::list_devices). Last writer wins on concurrent
/// updates for the same peer.
pub struct DeviceDirectory {
    peers: Mutex<Vec<PeerDevice>>,
    events: broadcast::Sender<DiscoveryEvent>,
    advertiser: AsyncMutex<Option<MdnsAdvertiser>>,
    browse: AsyncMutex<Option<BrowseTask>>,
}

impl std::fmt::Debug for DeviceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDirectory").finish_non_exhaustive()
    }
}

impl DeviceDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            peers: Mutex::new(Vec::new()),
            events,
            advertiser: AsyncMutex::new(None),
            browse: AsyncMutex::new(None),
        }
    }

    /// Subscribe to registry change events. Dropping the receiver
    /// unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Publish this device's advertisement. Idempotent for identical
    /// parameters; a changed name or identifier withdraws the prior record
    /// first (see [`mdns::REANNOUNCE_DELAY`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be created or
    /// registration fails.
    pub async fn advertise(&self, params: AdvertiseParams) -> Result<()> {
        let mut guard = self.advertiser.lock().await;
        if guard.is_none() {
            *guard = Some(MdnsAdvertiser::new()?);
        }
        guard
            .as_ref()
            .expect("advertiser just created")
            .advertise(params)
            .await
    }

    /// Withdraw the advertisement. Safe to call when not advertising.
    ///
    /// # Errors
    ///
    /// Returns an error if unregistration fails.
    pub async fn stop_advertising(&self) -> Result<()> {
        if let Some(advertiser) = self.advertiser.lock().await.as_ref() {
            advertiser.stop_advertising()?;
        }
        Ok(())
    }

    /// Start browsing for peers, feeding network events into the registry.
    ///
    /// Idempotent: a second call while already browsing logs and returns
    /// without creating duplicate listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be created.
    pub async fn start_browsing(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.browse.lock().await;
        if guard.is_some() {
            tracing::info!("Already browsing for peers");
            return Ok(());
        }

        let browser = MdnsBrowser::new()?;
        let directory = Arc::clone(self);

        let handle = tokio::spawn(async move {
            // One-hour windows; the loop only exits when the task is
            // aborted or the daemon goes away.
            while let Some(change) = browser.next_change(Duration::from_secs(3600)).await {
                directory.apply_change(&change);
            }
            tracing::debug!("mDNS browse loop ended");
        });

        *guard = Some(BrowseTask { handle });
        tracing::info!("Started browsing for peers");
        Ok(())
    }

    /// Stop browsing and clear the registry.
    pub async fn stop_browsing(&self) {
        if let Some(task) = self.browse.lock().await.take() {
            task.handle.abort();
        }
        self.peers.lock().expect("registry poisoned").clear();
        tracing::info!("Stopped browsing for peers");
    }

    /// Stop advertising and browsing, releasing underlying resources.
    pub async fn shutdown(&self) {
        if let Some(advertiser) = self.advertiser.lock().await.take() {
            if let Err(e) = advertiser.shutdown() {
                tracing::debug!("Advertiser shutdown: {e}");
            }
        }
        self.stop_browsing().await;
    }

    /// Apply one service change to the registry, emitting the resulting
    /// event to subscribers. Normally driven by the browse loop; exposed so
    /// the registry logic can be tested without a network.
    pub fn apply_change(&self, change: &ServiceChange) -> Option<DiscoveryEvent> {
        let event = match change {
            ServiceChange::Resolved(record) => {
                let Some(device_id) = record.device_id.clone() else {
                    // A device cannot be referenced without an identifier.
                    tracing::warn!(fullname = %record.fullname, "Discovery record missing device id, dropped");
                    return None;
                };

                let mut peers = self.peers.lock().expect("registry poisoned");
                if let Some(peer) = peers.iter_mut().find(|p| p.device_id == device_id) {
                    peer.merge(record);
                    let updated = peer.clone();
                    tracing::debug!(device_id = %device_id, name = %updated.device_name, "Peer updated");
                    DiscoveryEvent::Updated(updated)
                } else {
                    let peer = PeerDevice::from_record(record, device_id.clone());
                    peers.push(peer.clone());
                    tracing::info!(device_id = %device_id, name = %peer.device_name, "Peer discovered");
                    DiscoveryEvent::Discovered(peer)
                }
            }
            ServiceChange::Removed(fullname) => {
                let mut peers = self.peers.lock().expect("registry poisoned");
                let position = peers
                    .iter()
                    .position(|p| p.fullname.as_deref() == Some(fullname.as_str()))?;
                let peer = peers.remove(position);
                tracing::info!(device_id = %peer.device_id, name = %peer.device_name, "Peer removed");
                DiscoveryEvent::Removed(peer)
            }
        };

        // Fire-and-forget; no subscribers is fine.
        let _ = self.events.send(event.clone());
        Some(event)
    }

    /// Look up a peer by device identifier.
    #[must_use]
    pub fn get_device(&self, device_id: &str) -> Option<PeerDevice> {
        self.peers
            .lock()
            .expect("registry poisoned")
            .iter()
            .find(|p| p.device_id == device_id)
            .cloned()
    }

    /// Snapshot of the registry in registration order.
    #[must_use]
    pub fn list_devices(&self) -> Vec<PeerDevice> {
        self.peers.lock().expect("registry poisoned").clone()
    }

    /// One-shot peer enumeration: browse for `window`, then return every
    /// peer resolved during it. Does not touch the live registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be created.
    pub async fn scan(window: Duration) -> Result<Vec<PeerDevice>> {
        let browser = MdnsBrowser::new()?;
        let mut found: Vec<PeerDevice> = Vec::new();
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match browser.next_change(remaining).await {
                Some(ServiceChange::Resolved(record)) => {
                    let Some(device_id) = record.device_id.clone() else {
                        continue;
                    };
                    if let Some(peer) = found.iter_mut().find(|p| p.device_id == device_id) {
                        peer.merge(&record);
                    } else {
                        found.push(PeerDevice::from_record(&record, device_id));
                    }
                }
                Some(ServiceChange::Removed(fullname)) => {
                    found.retain(|p| p.fullname.as_deref() != Some(fullname.as_str()));
                }
                None => break,
            }
        }

        Ok(found)
    }
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

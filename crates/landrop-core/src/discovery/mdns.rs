//! mDNS/DNS-SD advertisement and browsing for Landrop.
//!
//! Devices publish themselves as `_landrop._tcp.local.` services with TXT
//! records carrying the device identifier, display name, and appearance
//! hints. Browsing peers key on the `id` TXT field; a record without it is
//! unusable and dropped.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::error::{Error, Result};

/// mDNS service type for Landrop.
pub const SERVICE_TYPE: &str = "_landrop._tcp.local.";

/// How long to let a withdrawal propagate before re-publishing under a
/// changed name or identifier. Re-publishing immediately risks stale
/// records lingering in peer caches.
pub const REANNOUNCE_DELAY: Duration = Duration::from_millis(100);

/// TXT record keys for service properties.
pub mod txt_keys {
    /// Display name key
    pub const NAME: &str = "name";
    /// Device identifier key
    pub const ID: &str = "id";
    /// Device identifier key (compatibility alias)
    pub const DEVICE_ID: &str = "device_id";
    /// Device icon key
    pub const ICON: &str = "icon";
    /// Device kind key
    pub const KIND: &str = "type";
    /// Application tag key
    pub const APP: &str = "app";
}

/// Parameters for an mDNS advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseParams {
    /// Port the transfer server listens on
    pub port: u16,
    /// Display name
    pub device_name: String,
    /// Stable device identifier
    pub device_id: String,
    /// Device icon hint (e.g. "laptop")
    pub icon: String,
    /// Device kind (e.g. "DESKTOP")
    pub kind: String,
}

impl AdvertiseParams {
    /// Service instance name: readable but unique across devices that share
    /// a display name.
    #[must_use]
    pub fn instance_name(&self) -> String {
        let id_prefix: String = self.device_id.chars().take(8).collect();
        format!("{}-{}", self.device_name, id_prefix)
    }

    fn to_txt_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            (txt_keys::NAME, self.device_name.clone()),
            (txt_keys::ID, self.device_id.clone()),
            (txt_keys::DEVICE_ID, self.device_id.clone()),
            (txt_keys::ICON, self.icon.clone()),
            (txt_keys::KIND, self.kind.clone()),
            (txt_keys::APP, crate::APP_TAG.to_string()),
        ]
    }
}

/// A raw service record extracted from a resolved mDNS event.
///
/// This is the transport-level shape; the [`DeviceDirectory`] turns it into
/// registry mutations and typed events.
///
/// [`DeviceDirectory`]: super::DeviceDirectory
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    /// Full service instance name (used to correlate removal events)
    pub fullname: String,
    /// Device identifier from the TXT record, if present
    pub device_id: Option<String>,
    /// Display name (falls back to the instance name)
    pub device_name: String,
    /// First IPv4 address the service resolved to
    pub address: Option<IpAddr>,
    /// Advertised port
    pub port: u16,
    /// Icon hint
    pub icon: Option<String>,
    /// Device kind
    pub kind: Option<String>,
}

impl ServiceRecord {
    /// Extract a record from a resolved `ServiceInfo`.
    #[must_use]
    pub fn from_service_info(info: &ServiceInfo) -> Self {
        let properties = info.get_properties();
        let get_str =
            |key: &str| -> Option<String> { properties.get(key).map(|p| p.val_str().to_string()) };

        let device_id = get_str(txt_keys::ID).or_else(|| get_str(txt_keys::DEVICE_ID));
        let device_name = get_str(txt_keys::NAME)
            .unwrap_or_else(|| info.get_fullname().to_string());

        let address = info
            .get_addresses()
            .iter()
            .find(|addr| addr.is_ipv4())
            .copied();

        Self {
            fullname: info.get_fullname().to_string(),
            device_id,
            device_name,
            address,
            port: info.get_port(),
            icon: get_str(txt_keys::ICON),
            kind: get_str(txt_keys::KIND),
        }
    }
}

/// A change observed on the network by the browser.
#[derive(Debug, Clone)]
pub enum ServiceChange {
    /// A service appeared or re-resolved (presence or update)
    Resolved(ServiceRecord),
    /// A service went away, identified by its full instance name
    Removed(String),
}

/// mDNS advertiser.
///
/// Publishes this device as a discoverable Landrop service.
pub struct MdnsAdvertiser {
    /// The mDNS daemon (wrapped in Option to support Drop)
    daemon: Option<ServiceDaemon>,
    /// Currently published advertisement, if any
    current: Mutex<Option<AdvertiseParams>>,
}

impl MdnsAdvertiser {
    /// Create a new advertiser.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be created.
    pub fn new() -> Result<Self> {
        let daemon =
            ServiceDaemon::new().map_err(|e| Error::Discovery(format!("mDNS daemon error: {e}")))?;

        Ok(Self {
            daemon: Some(daemon),
            current: Mutex::new(None),
        })
    }

    fn daemon(&self) -> Result<&ServiceDaemon> {
        self.daemon
            .as_ref()
            .ok_or_else(|| Error::Discovery("mDNS daemon already shutdown".to_string()))
    }

    /// Publish (or re-publish) this device's advertisement.
    ///
    /// Calling with parameters identical to the live advertisement is a
    /// no-op. When the name or identifier changed, the prior record is
    /// withdrawn first and the new one published after a short propagation
    /// delay.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub async fn advertise(&self, params: AdvertiseParams) -> Result<()> {
        let previous = {
            let current = self.current.lock().expect("advertiser state poisoned");
            if current.as_ref() == Some(&params) {
                tracing::debug!("Already advertising with identical parameters");
                return Ok(());
            }
            current.clone()
        };

        if let Some(prev) = previous {
            self.withdraw(&prev)?;
            tokio::time::sleep(REANNOUNCE_DELAY).await;
        }

        let raw_hostname = hostname::get().map_or_else(
            |_| "localhost".to_string(),
            |h| h.to_string_lossy().to_string(),
        );

        let host = if raw_hostname.ends_with(".local.") {
            raw_hostname
        } else if raw_hostname.to_lowercase().ends_with(".local") {
            format!("{raw_hostname}.")
        } else {
            format!("{raw_hostname}.local.")
        };

        let instance_name = params.instance_name();
        let txt_props = params.to_txt_properties();

        let service_info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &host,
            (),
            params.port,
            txt_props.as_slice(),
        )
        .map_err(|e| Error::Discovery(format!("Failed to create mDNS service info: {e}")))?
        .enable_addr_auto();

        self.daemon()?
            .register(service_info)
            .map_err(|e| Error::Discovery(format!("Failed to register mDNS service: {e}")))?;

        tracing::info!(
            device_id = %params.device_id,
            instance = %instance_name,
            port = params.port,
            "Advertising on mDNS"
        );

        *self.current.lock().expect("advertiser state poisoned") = Some(params);
        Ok(())
    }

    /// Withdraw the current advertisement. Safe to call when not advertising.
    ///
    /// # Errors
    ///
    /// Returns an error if unregistration fails.
    pub fn stop_advertising(&self) -> Result<()> {
        let params = self.current.lock().expect("advertiser state poisoned").take();
        if let Some(params) = params {
            self.withdraw(&params)?;
            tracing::info!(instance = %params.instance_name(), "Stopped advertising");
        }
        Ok(())
    }

    fn withdraw(&self, params: &AdvertiseParams) -> Result<()> {
        let full_name = format!("{}.{SERVICE_TYPE}", params.instance_name());

        let receiver = self
            .daemon()?
            .unregister(&full_name)
            .map_err(|e| Error::Discovery(format!("Failed to unregister mDNS service: {e}")))?;

        match receiver.recv_timeout(Duration::from_millis(500)) {
            Ok(status) => {
                tracing::debug!(instance = %params.instance_name(), ?status, "mDNS withdrawal completed");
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                tracing::debug!(instance = %params.instance_name(), "mDNS withdrawal timed out");
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                tracing::debug!(instance = %params.instance_name(), "mDNS withdrawal channel closed");
            }
        }

        Ok(())
    }

    /// Shutdown the advertiser and its daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.stop_advertising();

        if let Some(daemon) = self.daemon.take() {
            let receiver = daemon
                .shutdown()
                .map_err(|e| Error::Discovery(format!("Failed to shutdown mDNS daemon: {e}")))?;

            match receiver.recv_timeout(Duration::from_millis(500)) {
                Ok(status) => {
                    tracing::debug!(?status, "mDNS advertiser shutdown completed");
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    tracing::debug!("mDNS advertiser shutdown timed out");
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    tracing::debug!("mDNS advertiser shutdown channel disconnected");
                }
            }
        }
        Ok(())
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            match daemon.shutdown() {
                Ok(receiver) => match receiver.recv_timeout(Duration::from_millis(500)) {
                    Ok(status) => {
                        tracing::debug!(?status, "mDNS advertiser drop shutdown completed");
                    }
                    Err(_) => {
                        tracing::debug!("mDNS advertiser drop shutdown timed out or disconnected");
                    }
                },
                Err(e) => {
                    tracing::debug!("mDNS advertiser shutdown during drop: {e}");
                }
            }
        }
    }
}

/// mDNS browser.
///
/// Listens for Landrop services appearing, updating, and disappearing on
/// the local network.
pub struct MdnsBrowser {
    /// The mDNS daemon (wrapped in Option to support Drop)
    daemon: Option<ServiceDaemon>,
    /// Receiver for service events
    receiver: flume::Receiver<ServiceEvent>,
}

impl MdnsBrowser {
    /// Create a browser and start the underlying browse operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be created.
    pub fn new() -> Result<Self> {
        let daemon =
            ServiceDaemon::new().map_err(|e| Error::Discovery(format!("mDNS daemon error: {e}")))?;

        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(format!("Failed to browse mDNS services: {e}")))?;

        Ok(Self {
            daemon: Some(daemon),
            receiver,
        })
    }

    /// Wait for the next service change, or `None` when the browse window
    /// elapses or the daemon goes away.
    pub async fn next_change(&self, window: Duration) -> Option<ServiceChange> {
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }

            let result =
                tokio::time::timeout(remaining, async { self.receiver.recv_async().await }).await;

            match result {
                Ok(Ok(event)) => {
                    if let Some(change) = Self::map_event(event) {
                        return Some(change);
                    }
                }
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }

    /// Map a raw daemon event to a service change. Search-lifecycle events
    /// carry no record and are skipped.
    fn map_event(event: ServiceEvent) -> Option<ServiceChange> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                Some(ServiceChange::Resolved(ServiceRecord::from_service_info(&info)))
            }
            ServiceEvent::ServiceRemoved(_, fullname) => Some(ServiceChange::Removed(fullname)),
            _ => None,
        }
    }

    fn stop_browsing(&self) {
        if let Some(ref daemon) = self.daemon {
            if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
                tracing::debug!("Failed to stop mDNS browse: {e}");
            }
        }
    }

    /// Shutdown the browser and its daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_browsing();

        if let Some(daemon) = self.daemon.take() {
            let receiver = daemon
                .shutdown()
                .map_err(|e| Error::Discovery(format!("Failed to shutdown mDNS daemon: {e}")))?;

            match receiver.recv_timeout(Duration::from_millis(500)) {
                Ok(status) => {
                    tracing::debug!(?status, "mDNS browser shutdown completed");
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    tracing::debug!("mDNS browser shutdown timed out");
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    tracing::debug!("mDNS browser shutdown channel disconnected");
                }
            }
        }
        Ok(())
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        self.stop_browsing();

        if let Some(daemon) = self.daemon.take() {
            match daemon.shutdown() {
                Ok(receiver) => match receiver.recv_timeout(Duration::from_millis(500)) {
                    Ok(status) => {
                        tracing::debug!(?status, "mDNS browser drop shutdown completed");
                    }
                    Err(_) => {
                        tracing::debug!("mDNS browser drop shutdown timed out or disconnected");
                    }
                },
                Err(e) => {
                    tracing::debug!("mDNS browser shutdown during drop: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AdvertiseParams {
        AdvertiseParams {
            port: 8080,
            device_name: "Office Laptop".to_string(),
            device_id: "3f2a9c1e-0000-0000-0000-000000000000".to_string(),
            icon: "laptop".to_string(),
            kind: "DESKTOP".to_string(),
        }
    }

    #[test]
    fn test_service_type_format() {
        assert!(SERVICE_TYPE.ends_with(".local."));
        assert!(SERVICE_TYPE.starts_with("_landrop._tcp"));
    }

    #[test]
    fn test_instance_name_embeds_id_prefix() {
        let name = params().instance_name();
        assert_eq!(name, "Office Laptop-3f2a9c1e");
    }

    #[test]
    fn test_txt_properties_complete() {
        let txt = params().to_txt_properties();
        assert_eq!(txt.len(), 6);

        let app = txt.iter().find(|(k, _)| *k == txt_keys::APP);
        assert_eq!(app.unwrap().1, crate::APP_TAG);

        let id = txt.iter().find(|(k, _)| *k == txt_keys::ID).unwrap();
        let alias = txt.iter().find(|(k, _)| *k == txt_keys::DEVICE_ID).unwrap();
        assert_eq!(id.1, alias.1);
    }
}

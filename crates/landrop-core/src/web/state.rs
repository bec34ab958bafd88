//! Shared state for the transfer server.

use std::sync::Arc;

use crate::config::Config;
use crate::discovery::DeviceDirectory;
use crate::history::{ConfiguredLimits, TransferLedger, TransferLimits};
use crate::identity::DeviceIdentity;
use crate::pairing::{PairingAuthority, SystemClock};
use crate::session::SessionRegistry;
use crate::signaling::SignalingHub;
use crate::storage::Storage;
use crate::transfer::FileSender;

/// Everything the handlers need, shared behind an [`Arc`].
pub struct AppState {
    /// This device's persisted identity
    pub identity: DeviceIdentity,
    /// Peer registry from mDNS discovery
    pub directory: Arc<DeviceDirectory>,
    /// Pairing code issuance and validation
    pub pairing: Arc<PairingAuthority>,
    /// Signaling connection map and router
    pub hub: Arc<SignalingHub>,
    /// In-flight transfer sessions, derived from signaling events
    pub sessions: Arc<SessionRegistry>,
    /// Uploads directory
    pub storage: Storage,
    /// Outbound transfer pipeline
    pub sender: Arc<FileSender>,
    /// Completed-transfer history
    pub ledger: Arc<dyn TransferLedger>,
    /// Per-device upload limits
    pub limits: Arc<dyn TransferLimits>,
    /// Streaming chunk/progress settings
    pub config: Config,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Handler-facing handle to the application state.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Assemble state from loaded configuration and identity, wiring the
    /// session registry to the signaling hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the uploads directory cannot be created.
    pub async fn new(
        config: Config,
        identity: DeviceIdentity,
        ledger: Arc<dyn TransferLedger>,
    ) -> crate::error::Result<SharedState> {
        let storage = Storage::open(config.storage_dir()).await?;
        let hub = Arc::new(SignalingHub::new());
        let sessions = Arc::new(SessionRegistry::new());
        // Detached; the watcher exits when the hub is dropped.
        let _watcher = sessions.attach(&hub);

        let limits = Arc::new(ConfiguredLimits {
            max_upload_bytes: config.transfer.max_upload_bytes,
        });

        let pairing = Arc::new(PairingAuthority::with_clock(
            std::time::Duration::from_secs(config.transfer.pairing_ttl_secs),
            Box::new(SystemClock),
        ));

        Ok(Arc::new(Self {
            identity,
            directory: Arc::new(DeviceDirectory::new()),
            pairing,
            hub,
            sessions,
            storage,
            sender: Arc::new(FileSender::new(config.transfer.chunk_size)),
            ledger,
            limits,
            config,
        }))
    }
}

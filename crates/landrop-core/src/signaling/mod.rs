//! Signaling channel for Landrop.
//!
//! Devices hold one persistent duplex connection each and exchange tagged
//! JSON messages. Point-to-point messages (`TRANSFER_REQUEST`,
//! `TRANSFER_RESPONSE`, `TRANSFER_FINISH`) are forwarded verbatim to the
//! connection bound to their `targetId`; UI-group messages
//! (`FILE_METADATA`, `ACCEPT`, `REJECT`, `PROGRESS`, terminal transfer
//! events) are broadcast to every open connection so a receiver's UI can
//! observe a transfer it did not negotiate.
//!
//! The [`SignalingHub`] is transport-agnostic: the WebSocket layer pumps
//! frames in through [`handle_message`](SignalingHub::handle_message) and
//! out through the per-connection receiver handed back by
//! [`connect`](SignalingHub::connect). There is no store-and-forward — a
//! message for a device that is not connected right now is dropped and the
//! sender told so.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Identifier for one live signaling connection.
pub type ConnectionId = Uuid;

/// Addressing fields of a point-to-point message. Everything beyond them
/// is carried opaquely so forwarding stays verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Device the message is addressed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Transfer this message belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Body of a broadcast (UI-group) message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Transfer this event belongs to, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A signaling protocol message, tagged by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalMessage {
    /// Bind the sending connection to a device identifier
    #[serde(rename_all = "camelCase")]
    Register {
        device_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(rename = "deviceType", skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
    /// Server greeting sent as soon as a connection opens
    Ready { role: String },
    /// Acknowledges a successful REGISTER
    Registered { status: String },
    /// Routing or protocol failure reported back to a sender
    Error { message: String },
    /// Sender asks a specific device to receive a transfer
    TransferRequest(Envelope),
    /// Receiver answers a transfer request
    TransferResponse(Envelope),
    /// Either side marks the transfer finished
    TransferFinish(Envelope),
    /// A file is being offered to the group
    FileMetadata(Payload),
    /// The offered transfer was accepted
    Accept(Payload),
    /// The offered transfer was declined
    Reject(Payload),
    /// Bytes-moved update for an in-flight transfer
    Progress(Payload),
    /// The transfer finished successfully
    TransferComplete(Payload),
    /// The transfer failed
    TransferError(Payload),
}

impl SignalMessage {
    /// The transfer identifier carried by this message, if any.
    #[must_use]
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::TransferRequest(env) | Self::TransferResponse(env) | Self::TransferFinish(env) => {
                env.transfer_id.as_deref()
            }
            Self::FileMetadata(p)
            | Self::Accept(p)
            | Self::Reject(p)
            | Self::Progress(p)
            | Self::TransferComplete(p)
            | Self::TransferError(p) => p.transfer_id.as_deref(),
            Self::Register { .. } | Self::Ready { .. } | Self::Registered { .. } | Self::Error { .. } => None,
        }
    }
}

/// Metadata for a device currently bound to a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevice {
    /// Stable device identifier
    pub device_id: String,
    /// Display name
    pub name: String,
    /// Device kind (e.g. "DESKTOP")
    #[serde(rename = "type")]
    pub kind: String,
    /// Icon hint
    pub icon: String,
}

struct Binding {
    connection: ConnectionId,
    meta: RegisteredDevice,
}

struct HubInner {
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<SignalMessage>>,
    bindings: HashMap<String, Binding>,
}

/// Connection map and message router.
///
/// The hub exclusively owns the connection map. Disconnects drop the
/// binding immediately; a second REGISTER for the same identifier detaches
/// the old connection from routing without closing it.
pub struct SignalingHub {
    inner: Mutex<HubInner>,
    /// Mirror of every broadcast-class message, for in-process observers
    /// (session tracking) that are not signaling connections themselves.
    events: broadcast::Sender<SignalMessage>,
}

impl std::fmt::Debug for SignalingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingHub").finish_non_exhaustive()
    }
}

impl SignalingHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            inner: Mutex::new(HubInner {
                connections: HashMap::new(),
                bindings: HashMap::new(),
            }),
            events,
        }
    }

    /// Attach a new connection. Returns its identifier and the receiver
    /// the transport must drain to deliver outbound messages.
    #[must_use]
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<SignalMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().connections.insert(id, tx);
        tracing::debug!(connection = %id, "Signaling connection attached");
        (id, rx)
    }

    /// Detach a connection, removing its device binding if any.
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut inner = self.lock();
        inner.connections.remove(&connection);

        let unbound: Vec<String> = inner
            .bindings
            .iter()
            .filter(|(_, b)| b.connection == connection)
            .map(|(id, _)| id.clone())
            .collect();
        for device_id in unbound {
            inner.bindings.remove(&device_id);
            tracing::info!(device_id = %device_id, "Device unregistered from signaling");
        }
    }

    /// Route one inbound message from `connection`.
    pub fn handle_message(&self, connection: ConnectionId, message: SignalMessage) {
        match message {
            SignalMessage::Register {
                device_id,
                name,
                kind,
                icon,
            } => self.register(connection, device_id, name, kind, icon),
            msg @ (SignalMessage::TransferRequest(_)
            | SignalMessage::TransferResponse(_)
            | SignalMessage::TransferFinish(_)) => self.forward(connection, msg),
            msg @ (SignalMessage::FileMetadata(_)
            | SignalMessage::Accept(_)
            | SignalMessage::Reject(_)
            | SignalMessage::Progress(_)
            | SignalMessage::TransferComplete(_)
            | SignalMessage::TransferError(_)) => self.broadcast(msg),
            SignalMessage::Ready { .. }
            | SignalMessage::Registered { .. }
            | SignalMessage::Error { .. } => {
                tracing::debug!(connection = %connection, "Ignoring server-only message from client");
            }
        }
    }

    /// Broadcast a message to every open connection and in-process
    /// observers. Fire-and-forget: disconnected recipients are skipped.
    pub fn broadcast(&self, message: SignalMessage) {
        {
            let inner = self.lock();
            for tx in inner.connections.values() {
                let _ = tx.send(message.clone());
            }
        }
        let _ = self.events.send(message);
    }

    /// Report a protocol failure back to one connection.
    pub fn send_error(&self, connection: ConnectionId, message: impl Into<String>) {
        self.send_to(
            connection,
            SignalMessage::Error {
                message: message.into(),
            },
        );
    }

    /// Subscribe to the broadcast mirror without holding a connection.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.events.subscribe()
    }

    /// Snapshot of devices currently bound to a connection.
    #[must_use]
    pub fn list_registered_devices(&self) -> Vec<RegisteredDevice> {
        self.lock().bindings.values().map(|b| b.meta.clone()).collect()
    }

    fn register(
        &self,
        connection: ConnectionId,
        device_id: String,
        name: Option<String>,
        kind: Option<String>,
        icon: Option<String>,
    ) {
        let meta = RegisteredDevice {
            device_id: device_id.clone(),
            name: name.unwrap_or_else(|| "Unknown Device".to_string()),
            kind: kind.unwrap_or_else(|| "DESKTOP".to_string()),
            icon: icon.unwrap_or_else(|| "laptop".to_string()),
        };

        {
            let mut inner = self.lock();
            // Last REGISTER wins; the old connection stays open but is no
            // longer routable.
            inner.bindings.insert(
                device_id.clone(),
                Binding { connection, meta },
            );
        }

        tracing::info!(device_id = %device_id, connection = %connection, "Device registered on signaling");
        self.send_to(
            connection,
            SignalMessage::Registered {
                status: "OK".to_string(),
            },
        );
    }

    fn forward(&self, sender: ConnectionId, message: SignalMessage) {
        let target_id = match &message {
            SignalMessage::TransferRequest(env)
            | SignalMessage::TransferResponse(env)
            | SignalMessage::TransferFinish(env) => env.target_id.clone(),
            _ => None,
        };

        let Some(target_id) = target_id else {
            self.send_to(
                sender,
                SignalMessage::Error {
                    message: "targetId is required".to_string(),
                },
            );
            return;
        };

        let target_connection = self.lock().bindings.get(&target_id).map(|b| b.connection);
        match target_connection {
            Some(connection) => {
                tracing::debug!(target = %target_id, "Forwarding signaling message");
                self.send_to(connection, message);
            }
            None => {
                tracing::debug!(target = %target_id, "Signaling target offline, dropping message");
                self.send_to(
                    sender,
                    SignalMessage::Error {
                        message: "Target device offline".to_string(),
                    },
                );
            }
        }
    }

    fn send_to(&self, connection: ConnectionId, message: SignalMessage) {
        let tx = self.lock().connections.get(&connection).cloned();
        if let Some(tx) = tx {
            // A closed receiver means the transport already went away; the
            // disconnect path will clean up the binding.
            let _ = tx.send(message);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().expect("signaling hub poisoned")
    }
}

impl Default for SignalingHub {
    fn default() -> Self {
        Self::new()
    }
}

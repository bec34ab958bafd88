//! Per-transfer session tracking.
//!
//! A [`TransferSession`] follows one offered file from announcement to a
//! terminal outcome. The state machine is strict: an out-of-order event is
//! rejected with [`Error::InvalidTransition`] rather than silently applied.
//!
//! The [`SessionRegistry`] derives sessions from the signaling broadcast
//! stream, so any component with a [`SignalingHub`] reference can inspect
//! what transfers are in flight without joining the protocol itself.
//!
//! [`SignalingHub`]: crate::signaling::SignalingHub

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::signaling::{SignalMessage, SignalingHub};

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Metadata broadcast to the signaling group
    Announced,
    /// Receiver prompted; no timeout is enforced in-protocol
    AwaitingDecision,
    /// Receiver accepted, streaming not yet started
    Accepted,
    /// Receiver declined; terminal
    Rejected,
    /// Bytes are flowing
    Transferring,
    /// Streaming finished without error; terminal
    Complete,
    /// Streaming failed; terminal
    Failed,
    /// Explicitly cancelled; terminal
    Cancelled,
}

impl SessionState {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Complete | Self::Failed | Self::Cancelled
        )
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Announced => "ANNOUNCED",
            Self::AwaitingDecision => "AWAITING_DECISION",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Transferring => "TRANSFERRING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// An event driving the session state machine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The receiver has been prompted for a decision
    DecisionRequested,
    /// The receiver accepted the offer
    Accepted,
    /// The receiver declined the offer
    Rejected,
    /// The streaming pipeline started
    Started,
    /// The streaming pipeline finished cleanly
    Completed,
    /// The streaming pipeline failed
    Failed(String),
    /// The transfer was cancelled by external action
    Cancelled,
}

impl SessionEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::DecisionRequested => "decision_requested",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One file offered in a transfer announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Original filename
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// One tracked transfer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    /// Transfer identifier from the announcing FILE_METADATA
    pub transfer_id: String,
    /// Current state
    pub state: SessionState,
    /// Offered files, in announcement order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    /// First offered file's name, when announced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// First offered file's size in bytes, when announced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Announcing device, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Bytes moved so far, from PROGRESS events
    pub bytes_transferred: u64,
    /// Total bytes expected; the announced sizes until PROGRESS reports
    /// otherwise
    pub total_bytes: u64,
    /// Failure reason, for FAILED sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// When the session was announced
    pub created_at: DateTime<Utc>,
    /// When the state last changed
    pub updated_at: DateTime<Utc>,
}

impl TransferSession {
    /// Create a freshly announced session.
    #[must_use]
    pub fn announced(transfer_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            transfer_id: transfer_id.into(),
            state: SessionState::Announced,
            files: Vec::new(),
            file_name: None,
            file_size: None,
            sender_id: None,
            bytes_transferred: 0,
            total_bytes: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one event, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when the event is not legal in
    /// the current state. The session is left unchanged in that case.
    pub fn apply(&mut self, event: &SessionEvent) -> Result<SessionState> {
        use SessionState as S;

        let next = match (self.state, event) {
            (S::Announced, SessionEvent::DecisionRequested) => S::AwaitingDecision,
            (S::AwaitingDecision, SessionEvent::Accepted) => S::Accepted,
            (S::AwaitingDecision, SessionEvent::Rejected) => S::Rejected,
            (S::Accepted, SessionEvent::Started) => S::Transferring,
            (S::Transferring, SessionEvent::Completed) => S::Complete,
            (S::Transferring, SessionEvent::Failed(reason)) => {
                self.failure = Some(reason.clone());
                S::Failed
            }
            // Cancellation is legal from any state that has not completed.
            (
                S::Announced | S::AwaitingDecision | S::Accepted | S::Transferring,
                SessionEvent::Cancelled,
            ) => S::Cancelled,
            (state, event) => {
                return Err(Error::InvalidTransition {
                    from: state.name(),
                    event: event.name(),
                })
            }
        };

        self.state = next;
        self.updated_at = Utc::now();
        Ok(next)
    }
}

/// Tracks live sessions derived from the signaling broadcast stream.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, TransferSession>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that keeps this registry current from the hub's
    /// broadcast mirror. The task ends when the hub is dropped.
    pub fn attach(self: &Arc<Self>, hub: &SignalingHub) -> JoinHandle<()> {
        let mut events = hub.subscribe();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(message) => registry.observe(&message),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session registry lagged behind signaling events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Fold one broadcast message into session state. Messages without a
    /// transfer identifier, or for an unknown transfer, are ignored.
    pub fn observe(&self, message: &SignalMessage) {
        let Some(transfer_id) = message.transfer_id().map(String::from) else {
            return;
        };

        let mut sessions = self.lock();

        if let SignalMessage::FileMetadata(payload) = message {
            let mut session = TransferSession::announced(&transfer_id);
            session.files = announced_files(payload);
            session.file_name = session.files.first().map(|f| f.name.clone());
            session.file_size = session.files.first().map(|f| f.size);
            session.total_bytes = session.files.iter().map(|f| f.size).sum();
            session.sender_id = payload
                .rest
                .get("senderId")
                .and_then(|v| v.as_str())
                .map(String::from);
            // The broadcast itself is the announcement; the group is now
            // being asked to decide.
            let _ = session.apply(&SessionEvent::DecisionRequested);
            sessions.insert(transfer_id, session);
            return;
        }

        let Some(session) = sessions.get_mut(&transfer_id) else {
            tracing::debug!(transfer_id = %transfer_id, "Event for unknown transfer, ignored");
            return;
        };

        let mut events = Vec::new();
        match message {
            SignalMessage::Accept(_) => events.push(SessionEvent::Accepted),
            SignalMessage::Reject(_) => events.push(SessionEvent::Rejected),
            // The first progress event marks the start of streaming, and
            // every one carries the authoritative byte counters.
            SignalMessage::Progress(payload) => {
                if session.state == SessionState::Accepted {
                    events.push(SessionEvent::Started);
                }
                if matches!(
                    session.state,
                    SessionState::Accepted | SessionState::Transferring
                ) {
                    if let Some(received) =
                        payload.rest.get("receivedBytes").and_then(serde_json::Value::as_u64)
                    {
                        session.bytes_transferred = received;
                    }
                    if let Some(total) =
                        payload.rest.get("totalBytes").and_then(serde_json::Value::as_u64)
                    {
                        session.total_bytes = total;
                    }
                }
            }
            SignalMessage::TransferComplete(_) => {
                if session.state == SessionState::Accepted {
                    events.push(SessionEvent::Started);
                }
                events.push(SessionEvent::Completed);
            }
            SignalMessage::TransferError(payload) => {
                let reason = payload
                    .rest
                    .get("error")
                    .or_else(|| payload.rest.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("transfer failed")
                    .to_string();
                if session.state == SessionState::Accepted {
                    events.push(SessionEvent::Started);
                }
                events.push(SessionEvent::Failed(reason));
            }
            _ => {}
        }

        apply_all(session, &transfer_id, &events);
    }

    /// Cancel a tracked transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTransfer`] when no session with this
    /// identifier exists, or [`Error::InvalidTransition`] when the session
    /// has already reached a terminal state.
    pub fn cancel(&self, transfer_id: &str) -> Result<SessionState> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))?;
        session.apply(&SessionEvent::Cancelled)
    }

    /// Look up a session by transfer identifier.
    #[must_use]
    pub fn get(&self, transfer_id: &str) -> Option<TransferSession> {
        self.lock().get(transfer_id).cloned()
    }

    /// Snapshot of all tracked sessions.
    #[must_use]
    pub fn list(&self) -> Vec<TransferSession> {
        self.lock().values().cloned().collect()
    }

    /// Drop sessions that reached a terminal state, returning how many
    /// were removed.
    pub fn prune_terminal(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.state.is_terminal());
        before - sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TransferSession>> {
        self.sessions.lock().expect("session registry poisoned")
    }
}

/// Extract the offered files from a FILE_METADATA payload: the `files`
/// array when present, otherwise the single `fileName`/`fileSize` (or
/// `size`) pair.
fn announced_files(payload: &crate::signaling::Payload) -> Vec<FileEntry> {
    let from_list: Vec<FileEntry> = payload
        .rest
        .get("files")
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name").and_then(|v| v.as_str())?;
                    let size = item.get("size").and_then(serde_json::Value::as_u64).unwrap_or(0);
                    Some(FileEntry {
                        name: name.to_string(),
                        size,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if !from_list.is_empty() {
        return from_list;
    }

    let Some(name) = payload.rest.get("fileName").and_then(|v| v.as_str()) else {
        return Vec::new();
    };
    let size = payload
        .rest
        .get("fileSize")
        .or_else(|| payload.rest.get("size"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    vec![FileEntry {
        name: name.to_string(),
        size,
    }]
}

fn apply_all(session: &mut TransferSession, transfer_id: &str, events: &[SessionEvent]) {
    for event in events {
        if let Err(e) = session.apply(event) {
            tracing::debug!(transfer_id = %transfer_id, "Out-of-order transfer event: {e}");
            return;
        }
    }
}

//! Live connection handles as seen by the registry.
//!
//! The transport owns the socket; the registry only needs three things
//! from it: a stable identity, a way to push an [`Envelope`], and a close
//! notification. [`ConnectionHandle`] bundles those. The close side is a
//! [`CloseSignal`] kept by the transport; firing or dropping it marks the
//! connection closed, which the registry watches to unregister it.

use std::sync::Arc;

use livewire_types::{ChangeEvent, ConnectionId, Envelope};
use tokio::sync::{mpsc, watch};

/// Errors from pushing a frame to a connection.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// The connection is closed or its writer has gone away.
    #[error("connection closed")]
    Closed,

    /// The payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Push side of a real-time connection.
///
/// Implementations must not block: the registry emits while holding a
/// model's registration lock.
pub trait ConnectionSink: Send + Sync {
    /// Queue one frame for delivery.
    fn emit(&self, envelope: &Envelope) -> Result<(), EmitError>;
}

/// A sink that forwards frames into an unbounded channel.
///
/// The transport task drains the receiver and writes frames to the
/// socket.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSink {
    /// Wrap a channel sender.
    pub const fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }
}

impl ConnectionSink for ChannelSink {
    fn emit(&self, envelope: &Envelope) -> Result<(), EmitError> {
        self.tx
            .send(envelope.clone())
            .map_err(|_send_error| EmitError::Closed)
    }
}

/// Marks a connection closed when fired or dropped.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    /// Mark the connection closed.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for CloseSignal {
    fn drop(&mut self) {
        self.tx.send_replace(true);
    }
}

/// Registry-side view of one live connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sink: Arc<dyn ConnectionSink>,
    closed: watch::Receiver<bool>,
}

impl core::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Create a handle around a sink, with a fresh identity.
    pub fn new(sink: Arc<dyn ConnectionSink>) -> (Self, CloseSignal) {
        let (tx, closed) = watch::channel(false);
        let handle = Self {
            id: ConnectionId::new(),
            sink,
            closed,
        };
        (handle, CloseSignal { tx })
    }

    /// Create a handle whose frames arrive on the returned receiver.
    pub fn channel() -> (Self, CloseSignal, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, signal) = Self::new(Arc::new(ChannelSink::new(tx)));
        (handle, signal, rx)
    }

    /// The connection identity.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the transport has closed the connection.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Resolve once the connection closes.
    pub async fn closed(&self) {
        let mut rx = self.closed.clone();
        // An error means the signal was dropped, which also means closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Push a change event, named per [`ChangeEvent::event_name`].
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::Closed`] if the connection has closed.
    pub fn emit_change(&self, event: &ChangeEvent) -> Result<(), EmitError> {
        let envelope = Envelope {
            event: event.event_name(),
            payload: serde_json::to_value(event)?,
        };
        self.emit(&envelope)
    }

    /// Push a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::Closed`] if the connection has closed.
    pub fn emit(&self, envelope: &Envelope) -> Result<(), EmitError> {
        if self.is_closed() {
            return Err(EmitError::Closed);
        }
        self.sink.emit(envelope)
    }
}

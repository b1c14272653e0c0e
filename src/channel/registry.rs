//! Connection registry
//!
//! Single source of truth for the bound listener, the current device
//! connection and the pending request. Owned by the channel behind one mutex
//! that is never held across an await point.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::coordinator::{ConnectionId, Coordinator};

/// A frame queued for a connection's writer, with a transmit acknowledgement
#[derive(Debug)]
pub(crate) struct Outbound {
    pub frame: String,
    pub ack: oneshot::Sender<Result<(), String>>,
}

/// Handle on one device connection; the connection task owns the socket
#[derive(Debug)]
pub(crate) struct PeerHandle {
    pub id: ConnectionId,
    pub remote: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    close: Mutex<Option<oneshot::Sender<()>>>,
    open: AtomicBool,
}

/// Receiving ends handed to the connection task
pub(crate) struct PeerTaskEnds {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub close: oneshot::Receiver<()>,
}

impl PeerHandle {
    pub fn new(id: ConnectionId, remote: SocketAddr) -> (Self, PeerTaskEnds) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let handle = Self {
            id,
            remote,
            outbound: outbound_tx,
            close: Mutex::new(Some(close_tx)),
            open: AtomicBool::new(true),
        };
        let ends = PeerTaskEnds {
            outbound: outbound_rx,
            close: close_rx,
        };
        (handle, ends)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Ask the connection task to close the socket. Best-effort.
    pub fn close(&self) {
        self.mark_closed();
        let sender = self
            .close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Queue a frame and wait until the writer reports the transmit result
    pub async fn send(&self, frame: String) -> Result<(), String> {
        if !self.open.load(Ordering::Acquire) {
            return Err("connection is closed".to_string());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send(Outbound { frame, ack: ack_tx })
            .map_err(|_| "connection writer has stopped".to_string())?;
        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err("connection closed before the frame was written".to_string()),
        }
    }
}

/// The bound listener and its accept loop
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn new(addr: SocketAddr, shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            addr,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Stop accepting and wait until the bound port is released
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
        let _ = self.task.await;
    }
}

#[derive(Debug)]
struct CurrentPeer {
    handle: Arc<PeerHandle>,
    identifier: Option<String>,
}

/// Process-wide channel state
#[derive(Debug, Default)]
pub(crate) struct Registry {
    listener: Option<ListenerHandle>,
    peer: Option<CurrentPeer>,
    pub coordinator: Coordinator,
    next_connection: u64,
    /// Bumped by every teardown; a bind started in an older epoch is stale
    epoch: u64,
}

impl Registry {
    pub fn next_connection_id(&mut self) -> ConnectionId {
        self.next_connection += 1;
        ConnectionId(self.next_connection)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Record the bound listener, returning any previous one to close
    pub fn set_listener(&mut self, listener: ListenerHandle) -> Option<ListenerHandle> {
        self.listener.replace(listener)
    }

    pub fn take_listener(&mut self) -> Option<ListenerHandle> {
        self.listener.take()
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.addr)
    }

    /// Make `handle` the current peer
    ///
    /// Returns the replaced peer, which the caller must close. Installing the
    /// connection that is already current is a no-op.
    pub fn install_peer(&mut self, handle: Arc<PeerHandle>) -> Option<Arc<PeerHandle>> {
        if self.is_current(handle.id) {
            return None;
        }
        self.peer
            .replace(CurrentPeer {
                handle,
                identifier: None,
            })
            .map(|old| old.handle)
    }

    pub fn is_current(&self, id: ConnectionId) -> bool {
        matches!(&self.peer, Some(p) if p.handle.id == id)
    }

    /// The current peer, if its connection is still open
    pub fn open_peer(&self) -> Option<Arc<PeerHandle>> {
        self.peer
            .as_ref()
            .filter(|p| p.handle.is_open())
            .map(|p| p.handle.clone())
    }

    /// Record the identifier a connection reported, if it is still current
    pub fn set_identifier(&mut self, id: ConnectionId, identifier: Option<String>) -> bool {
        match &mut self.peer {
            Some(peer) if peer.handle.id == id => {
                peer.identifier = identifier;
                true
            }
            _ => false,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.peer.as_ref().and_then(|p| p.identifier.as_deref())
    }

    /// Forget the peer if `id` is still current
    pub fn remove_peer(&mut self, id: ConnectionId) -> bool {
        if self.is_current(id) {
            self.peer = None;
            true
        } else {
            false
        }
    }

    pub fn take_peer(&mut self) -> Option<Arc<PeerHandle>> {
        self.peer.take().map(|p| p.handle)
    }
}

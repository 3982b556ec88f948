//! The network adapter: an abstract broadcast/receive pair.
//!
//! The wire transport is out of scope; what the engine sees is a
//! [`Broadcaster`] with one method per message kind and a
//! [`NetworkReceiver`] of tagged messages. The in-process hub below wires N
//! local nodes over bincode-framed channels for tests and simulation. Sends
//! to a full downstream buffer drop (and log); a node never receives its
//! own broadcasts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ep1_core::block::Block;
use ep1_core::constants::NETWORK_CHANNEL_CAPACITY;
use ep1_core::transaction::Transaction;
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::NetworkMessage;

/// Outbound half of the adapter.
pub trait Broadcaster: Send + Sync {
    fn broadcast_block(&self, block: &Block);
    fn broadcast_transaction(&self, tx: &Transaction);
}

/// Inbound half: bincode frames decoded on receive.
pub struct NetworkReceiver {
    frames: mpsc::Receiver<Vec<u8>>,
}

impl NetworkReceiver {
    /// Next decodable message; `None` once every sender is gone. Frames
    /// that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<NetworkMessage> {
        loop {
            let bytes = self.frames.recv().await?;
            match bincode::deserialize(&bytes) {
                Ok(message) => return Some(message),
                Err(e) => warn!(error = %e, "failed to decode inbound frame"),
            }
        }
    }

    /// Non-blocking receive; `None` when the queue is currently empty.
    pub fn try_recv(&mut self) -> Option<NetworkMessage> {
        loop {
            let bytes = self.frames.try_recv().ok()?;
            match bincode::deserialize(&bytes) {
                Ok(message) => return Some(message),
                Err(e) => warn!(error = %e, "failed to decode inbound frame"),
            }
        }
    }
}

struct HubPeer {
    id: usize,
    frames: mpsc::Sender<Vec<u8>>,
}

struct HubInner {
    peers: Mutex<Vec<HubPeer>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

/// In-process broadcast hub. Every joined node gets a broadcaster that
/// fans frames out to every *other* node.
pub struct InProcessHub {
    inner: Arc<HubInner>,
}

impl InProcessHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                peers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Join the hub as a new node.
    pub fn join(&self) -> (Arc<dyn Broadcaster>, NetworkReceiver) {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) as usize;
        let (tx, rx) = mpsc::channel(NETWORK_CHANNEL_CAPACITY);
        self.inner
            .peers
            .lock()
            .expect("hub lock poisoned")
            .push(HubPeer { id, frames: tx });
        let broadcaster = Arc::new(HubBroadcaster {
            hub: Arc::clone(&self.inner),
            self_id: id,
        });
        (broadcaster, NetworkReceiver { frames: rx })
    }

    /// Frames dropped on full downstream buffers since startup.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

impl Default for InProcessHub {
    fn default() -> Self {
        Self::new()
    }
}

struct HubBroadcaster {
    hub: Arc<HubInner>,
    self_id: usize,
}

impl HubBroadcaster {
    fn fan_out(&self, message: &NetworkMessage) {
        let bytes = match bincode::serialize(message) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast");
                return;
            }
        };
        let peers = self.hub.peers.lock().expect("hub lock poisoned");
        for peer in peers.iter() {
            // Never deliver a node's own broadcasts back to it.
            if peer.id == self.self_id {
                continue;
            }
            if peer.frames.try_send(bytes.clone()).is_err() {
                self.hub.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(peer = peer.id, "inbound buffer full, dropping frame");
            }
        }
    }
}

impl Broadcaster for HubBroadcaster {
    fn broadcast_block(&self, block: &Block) {
        self.fan_out(&NetworkMessage::Block(block.clone()));
    }

    fn broadcast_transaction(&self, tx: &Transaction) {
        self.fan_out(&NetworkMessage::Transaction(tx.clone()));
    }
}

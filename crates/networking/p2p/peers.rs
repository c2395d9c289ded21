use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

/// Opaque peer identifier handed over by the transport.
pub type PeerId = Vec<u8>;

/// The transport-level list of connected peers. Connect and disconnect
/// serialize on the book's lock.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: Mutex<Vec<PeerId>>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PeerId>> {
        match self.peers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("peer book lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn connect(&self, peer: PeerId) {
        let mut peers = self.lock();
        if !peers.contains(&peer) {
            debug!(peer = %hex_of(&peer), "peer connected");
            peers.push(peer);
        }
    }

    pub fn disconnect(&self, peer: &[u8]) {
        let mut peers = self.lock();
        if let Some(position) = peers.iter().position(|known| known == peer) {
            peers.remove(position);
            debug!(peer = %hex_of(peer), "peer disconnected");
        }
    }

    pub fn contains(&self, peer: &[u8]) -> bool {
        self.lock().iter().any(|known| known == peer)
    }

    pub fn list(&self) -> Vec<PeerId> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

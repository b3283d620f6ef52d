use raftstream::tcp::client::ReplicaClient;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct FanoutInner {
    /// Peer addresses in join order. Every member has a handle in `outputs`;
    /// both collections change together under the one lock.
    peers: Vec<String>,
    outputs: HashMap<String, Arc<ReplicaClient>>,
}

/// The set of replica peers and one output handle per peer.
///
/// Handles are created per peer, not per stream, and multiplexed across all
/// streams; they connect lazily on the first write. Open streams hold their
/// own snapshot of this set, so growing it never affects them.
#[derive(Debug, Default)]
pub struct PeerFanout {
    inner: RwLock<FanoutInner>,
}

impl PeerFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges new peers into the set, creating one handle per new peer.
    /// Already-known peers keep their existing handle.
    pub fn add_peers(&self, addresses: &[String]) {
        let mut inner = self.inner.write().expect("Peer fan-out lock is poisoned");
        for address in addresses {
            if inner.outputs.contains_key(address) {
                debug!("Peer {address} is already known.");
                continue;
            }

            info!("Adding peer: {address}");
            let client = Arc::new(ReplicaClient::new(address));
            inner.outputs.insert(address.clone(), client);
            inner.peers.push(address.clone());
        }
    }

    /// The ordered snapshot of output handles for a stream, taken once when
    /// its header arrives.
    pub fn open_outputs(&self) -> Vec<Arc<ReplicaClient>> {
        let inner = self.inner.read().expect("Peer fan-out lock is poisoned");
        inner
            .peers
            .iter()
            .filter_map(|address| inner.outputs.get(address).cloned())
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.inner
            .read()
            .expect("Peer fan-out lock is poisoned")
            .peers
            .len()
    }

    /// Closes every handle. In-flight writes fail rather than hang.
    pub async fn close(&self) {
        let outputs = self.open_outputs();
        for output in outputs {
            output.close().await;
        }
    }
}

use crate::streaming::system::StreamSystem;
use crate::tcp::tcp_listener;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Starts the TCP stream server.
/// Returns the address the server is listening on.
pub async fn start(system: Arc<StreamSystem>) -> SocketAddr {
    info!("Initializing RaftStream TCP server...");
    let address = system.config().tcp.address.clone();
    let address = tcp_listener::start(&address, system).await;
    info!("RaftStream TCP server has started on: {:?}", address);
    address
}

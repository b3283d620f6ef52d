use crate::streaming::system::StreamSystem;
use crate::tcp::connection_handler::{handle_connection, handle_error};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub async fn start(address: &str, system: Arc<StreamSystem>) -> SocketAddr {
    let listener = TcpListener::bind(address)
        .await
        .expect("Unable to start RaftStream TCP server.");
    let local_addr = listener
        .local_addr()
        .expect("Failed to get local address for TCP listener");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, address)) => {
                    info!("Accepted new TCP connection: {address}");
                    let system = system.clone();
                    tokio::spawn(async move {
                        if let Err(error) = handle_connection(address, stream, system).await {
                            handle_error(error);
                        }
                    });
                }
                Err(error) => error!("Unable to accept TCP socket, error: {error}"),
            }
        }
    });
    local_addr
}

/// Configuration for the TCP replica client.
#[derive(Debug, Clone)]
pub struct ReplicaClientConfig {
    /// Address of the replica's stream endpoint.
    pub server_address: String,
    /// Disables Nagle's algorithm on the connection.
    pub nodelay: bool,
}

impl Default for ReplicaClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8890".to_string(),
            nodelay: true,
        }
    }
}

impl ReplicaClientConfig {
    pub fn new(server_address: &str) -> Self {
        Self {
            server_address: server_address.to_string(),
            ..Default::default()
        }
    }
}

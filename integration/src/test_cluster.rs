use raftstream::tcp::client::ReplicaClient;
use server::configs::server::ServerConfig;
use server::streaming::consensus::LogOnlyConsensus;
use server::streaming::state_machine::{InMemoryStateMachine, StateMachine};
use server::streaming::system::StreamSystem;
use server::tcp::tcp_server;
use std::sync::Arc;

/// One in-process RaftStream server listening on an ephemeral port.
pub struct TestNode {
    pub system: Arc<StreamSystem>,
    pub address: String,
}

pub async fn start_node(state_machine: Arc<dyn StateMachine>, peers: Vec<String>) -> TestNode {
    let mut config = ServerConfig::default();
    config.tcp.address = "127.0.0.1:0".to_string();
    config.stream.peers = peers;
    let system = Arc::new(StreamSystem::new(
        Arc::new(config),
        state_machine,
        Arc::new(LogOnlyConsensus),
    ));
    let address = tcp_server::start(system.clone()).await.to_string();
    TestNode { system, address }
}

/// A primary server fanning out to N replica servers, each of them backed by
/// an inspectable in-memory state machine.
pub struct TestCluster {
    pub primary: TestNode,
    pub replicas: Vec<TestNode>,
    pub primary_state: Arc<InMemoryStateMachine>,
    pub replica_states: Vec<Arc<InMemoryStateMachine>>,
}

impl TestCluster {
    pub async fn start(replica_count: usize) -> Self {
        let mut replicas = Vec::with_capacity(replica_count);
        let mut replica_states = Vec::with_capacity(replica_count);
        for _ in 0..replica_count {
            let state_machine = Arc::new(InMemoryStateMachine::new());
            replicas.push(start_node(state_machine.clone(), Vec::new()).await);
            replica_states.push(state_machine);
        }

        let peers = replicas.iter().map(|node| node.address.clone()).collect();
        let primary_state = Arc::new(InMemoryStateMachine::new());
        let primary = start_node(primary_state.clone(), peers).await;
        Self {
            primary,
            replicas,
            primary_state,
            replica_states,
        }
    }

    pub fn client(&self) -> Arc<ReplicaClient> {
        Arc::new(ReplicaClient::new(&self.primary.address))
    }
}

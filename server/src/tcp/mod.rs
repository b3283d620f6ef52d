pub mod connection_handler;
pub mod tcp_listener;
pub mod tcp_server;

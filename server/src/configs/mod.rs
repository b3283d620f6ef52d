pub mod config_provider;
pub mod server;

pub mod args;
pub mod configs;
pub mod server_error;
pub mod streaming;
pub mod tcp;

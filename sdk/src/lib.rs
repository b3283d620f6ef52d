pub mod bytes_serializable;
pub mod codec;
pub mod error;
pub mod packet;
pub mod stream;
pub mod tcp;

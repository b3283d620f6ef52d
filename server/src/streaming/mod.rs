pub mod consensus;
pub mod fanout;
pub mod finalizer;
pub mod registry;
pub mod replies;
pub mod sink_writer;
pub mod state_machine;
pub mod stream;
pub mod system;

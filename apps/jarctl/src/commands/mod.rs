pub mod self_update;
pub mod server;
pub mod setup;

pub mod agent;
pub mod config;
pub mod error;
pub mod notify;
pub mod platform;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod verify;
pub mod workflow;
pub mod workspace;

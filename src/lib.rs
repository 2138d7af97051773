pub mod backup;
pub mod cache;
pub mod config;
pub mod directory;
pub mod events;
pub mod ipc;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod portal;
pub mod reconcile;
pub mod server;
pub mod validate;

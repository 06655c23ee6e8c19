//! IPC module for controlling and observing the daemon

mod protocol;
mod server;

pub use server::Server;

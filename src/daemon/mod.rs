//! Per-workspace daemon: socket RPC, debounced auto-flush, auto-import.

pub mod client;
pub mod debounce;
pub mod discovery;
pub mod lockfile;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use debounce::Debouncer;
pub use protocol::{Request, Response, StatusInfo, MAGIC};
pub use server::Daemon;

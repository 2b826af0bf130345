//! DeZog remote protocol server for a ZX Spectrum Next emulator.
//!
//! The host emulator implements [`Machine`] and hands it to a
//! [`DzrpServer`]. The server runs on its own thread; the host keeps calling
//! [`ServerHandle::tick`] from its frame loop so that stops the emulator makes
//! on its own (breakpoints, watchpoints, its UI) reach the client.

mod commands;
pub mod config;
mod error;
pub mod machine;
pub mod registry;
mod server;
pub mod session;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::Error;
pub use machine::{CpuState, DebugCmd, Machine, MemoryMachine, Registers};
pub use server::{DzrpServer, ServerHandle};

/// Format bytes as hex string for trace output
pub(crate) fn fmt_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

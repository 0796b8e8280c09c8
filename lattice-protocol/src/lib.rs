//! Types and client for the latticed local control channel.

use std::path::PathBuf;

pub mod client;
pub mod conf;
pub mod errors;
pub mod protocol;

/// Default location of the latticed control socket
pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/lattice/latticed.sock")
}

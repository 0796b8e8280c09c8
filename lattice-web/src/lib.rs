//! Local web control surface for the latticed daemon.
//!
//! Intended for NAS devices and similar appliances where a browser is the
//! natural way to operate the daemon. Authorization is delegated to the host
//! platform; state changes go through the daemon's local control channel.

pub mod auth;
pub mod login;
pub mod platform;
pub mod server;

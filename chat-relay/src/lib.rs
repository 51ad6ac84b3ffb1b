//! Multi-client chat relay over a newline-delimited TCP protocol.
//!
//! Clients announce a display name with `N <name>`, send text with `S <text>`,
//! and receive every message as `M <name> <text>`. Modules, leaves first:
//!
//! - [`frame`] defines the three record kinds and their byte encoding.
//! - [`codec`] reads and writes frames over async byte streams.
//! - [`registry`] holds the live peers behind one mutex and fans broadcasts
//!   out to them.
//! - [`session`] drives one connection: decode a frame, update the peer's
//!   name or broadcast its message, repeat until the stream ends.
//! - [`server`] binds the listener, registers each connection, and spawns its
//!   session; it also coordinates shutdown.
//! - [`client`] is a terminal client for the same protocol.
//! - [`cli`] and [`config`] turn command-line arguments into settings.
//!
//! Unit tests live beside each module; `tests/` drives a real relay over TCP.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod session;

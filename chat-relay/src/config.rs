use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::{cli::ServerArgs, codec::DEFAULT_MAX_FRAME_LEN};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime settings for a [`crate::server::Relay`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Bound on each peer write during a broadcast, so one stalled reader
    /// cannot hold the registry indefinitely.
    pub write_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl RelayConfig {
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }
}

impl From<&ServerArgs> for RelayConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            listen: args.listen,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            max_frame_len: args.max_frame_len,
        }
    }
}

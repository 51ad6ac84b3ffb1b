//! Read-decode-dispatch loop for one connection.

use std::io;

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    select,
    sync::watch,
};
use tracing::{debug, info, warn};

use crate::{
    codec::FrameReader,
    error::{DecodeError, ProtocolError},
    frame::{Frame, validate_name},
    registry::{PeerId, Registry},
};

/// Naming state of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Named(String),
}

impl SessionState {
    /// The name attached to outgoing messages; empty while anonymous.
    pub fn name(&self) -> &str {
        match self {
            SessionState::Anonymous => "",
            SessionState::Named(name) => name,
        }
    }
}

/// Why a session closed.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed its stream on a record boundary.
    Disconnected,
    Protocol(ProtocolError),
    Io(io::Error),
    Shutdown,
}

pub struct Session {
    peer: PeerId,
    state: SessionState,
}

impl Session {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: SessionState::Anonymous,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Applies one decoded frame.
    pub async fn handle_frame<W>(&mut self, frame: Frame, registry: &Registry<W>)
    where
        W: AsyncWrite + Unpin + Send,
    {
        match frame {
            Frame::Announce { name } => {
                if let Err(error) = validate_name(&name) {
                    warn!(peer = %self.peer, %error, "ignoring unusable display name");
                    return;
                }
                info!(peer = %self.peer, %name, "peer announced name");
                self.state = SessionState::Named(name);
            }
            Frame::Outbound { text } => {
                debug!(peer = %self.peer, name = self.state.name(), %text, "received message");
                let delivered = Frame::Delivered {
                    name: self.state.name().to_string(),
                    text,
                };
                let report = registry.broadcast(&delivered).await;
                debug!(
                    peer = %self.peer,
                    delivered = report.delivered,
                    failed = report.failures.len(),
                    skipped = report.skipped,
                    "message broadcast"
                );
            }
            Frame::Delivered { .. } => {
                warn!(peer = %self.peer, "ignoring delivered frame sent by a client");
            }
        }
    }

    async fn drive<R, W>(
        &mut self,
        reader: &mut FrameReader<R>,
        registry: &Registry<W>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            let decoded = select! {
                biased;
                _ = shutdown_requested(shutdown) => return SessionEnd::Shutdown,
                decoded = reader.read_frame() => decoded,
            };

            match decoded {
                Ok(frame) => self.handle_frame(frame, registry).await,
                Err(DecodeError::EndOfStream) => return SessionEnd::Disconnected,
                Err(DecodeError::Protocol(err)) => return SessionEnd::Protocol(err),
                Err(DecodeError::Io(err)) => return SessionEnd::Io(err),
            }
        }
    }
}

/// Runs the session for `peer` until its stream ends, it misbehaves, or
/// `shutdown` flips to `true`. The peer is removed from `registry` exactly once
/// on every exit path.
pub async fn run<R, W>(
    peer: PeerId,
    mut reader: FrameReader<R>,
    registry: &Registry<W>,
    mut shutdown: watch::Receiver<bool>,
) -> SessionEnd
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut session = Session::new(peer);
    let end = session.drive(&mut reader, registry, &mut shutdown).await;
    registry.remove(peer).await;

    let name = session.state().name();
    match &end {
        SessionEnd::Disconnected => info!(%peer, name, "peer disconnected"),
        SessionEnd::Shutdown => info!(%peer, name, "session closed for shutdown"),
        SessionEnd::Protocol(error) => {
            warn!(%peer, name, %error, "closing session on protocol error");
        }
        SessionEnd::Io(error) => warn!(%peer, name, ?error, "closing session on read error"),
    }
    end
}

/// Resolves once shutdown is signalled. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::watch,
    task::{JoinError, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{
    codec::FrameReader,
    config::RelayConfig,
    error::BindError,
    registry::Registry,
    session::{self, SessionEnd},
};

pub type TcpRegistry = Registry<OwnedWriteHalf>;

/// Accepts connections and runs one session task per peer.
pub struct Relay {
    listener: TcpListener,
    registry: Arc<TcpRegistry>,
    config: RelayConfig,
}

impl Relay {
    /// Binds the listening socket named by `config.listen`.
    pub async fn bind(config: RelayConfig) -> Result<Self, BindError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| BindError {
                addr: config.listen,
                source,
            })?;
        Ok(Self::from_listener(listener, config))
    }

    /// Wraps an already bound listener; `config.listen` is not used.
    pub fn from_listener(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new(config.write_timeout)),
            config,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<TcpRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections forever.
    pub async fn serve(self) {
        self.run_until(std::future::pending()).await;
    }

    /// Accepts connections until `shutdown` resolves, then signals every session
    /// to close and waits for all of them. The registry is empty on return.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            registry,
            config,
        } = self;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        admit(stream, addr, &registry, &config, stop_rx.clone(), &mut sessions).await;
                    }
                    Err(error) => warn!(?error, "failed to accept connection"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(joined);
                }
            }
        }

        info!(sessions = sessions.len(), "relay shutting down");
        drop(listener);
        let _ = stop_tx.send(true);
        while let Some(joined) = sessions.join_next().await {
            log_session_exit(joined);
        }
        debug!("all sessions drained");
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await;
    }
}

async fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    registry: &Arc<TcpRegistry>,
    config: &RelayConfig,
    shutdown: watch::Receiver<bool>,
    sessions: &mut JoinSet<SessionEnd>,
) {
    if let Err(error) = stream.set_nodelay(true) {
        debug!(%addr, ?error, "failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let peer = registry.add(Some(addr), write_half).await;
    info!(%peer, %addr, "accepted connection");

    let reader = FrameReader::with_max_frame_len(BufReader::new(read_half), config.max_frame_len);
    let registry = Arc::clone(registry);
    sessions.spawn(async move { session::run(peer, reader, &registry, shutdown).await });
}

fn log_session_exit(joined: Result<SessionEnd, JoinError>) {
    if let Err(error) = joined {
        warn!(?error, "session task failed");
    }
}

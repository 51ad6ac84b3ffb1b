//! The set of connected peers and the broadcast fan-out over them.
//!
//! Locking discipline: every membership change and every broadcast goes through
//! the single async mutex inside [`Registry`]. A broadcast holds it for the
//! whole encode-and-write pass, so records from two broadcasts never interleave
//! on one peer, and a peer added concurrently receives all of a broadcast or
//! none of it.

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{io::AsyncWrite, sync::Mutex, time::timeout};
use tracing::{debug, warn};

use crate::{codec::FrameWriter, error::DeliveryError, frame::Frame};

/// Identity of one connection, unique for the lifetime of a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry-side state of one connection: the outbound half of its stream.
///
/// `broken` is set once a write fails or times out. The stream may then end in
/// a partial record, so nothing more is framed onto it.
struct Peer<W> {
    addr: Option<SocketAddr>,
    writer: FrameWriter<W>,
    broken: bool,
}

/// Outcome of one [`Registry::broadcast`] call.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failures: Vec<DeliveryError>,
    /// Peers passed over because an earlier write to them failed.
    pub skipped: usize,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

pub struct Registry<W> {
    peers: Mutex<BTreeMap<PeerId, Peer<W>>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl<W> Registry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// `write_timeout` bounds each individual peer write during a broadcast.
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            peers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
        }
    }

    /// Registers the outbound half of a new connection.
    pub async fn add(&self, addr: Option<SocketAddr>, writer: W) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut peers = self.peers.lock().await;
        peers.insert(
            id,
            Peer {
                addr,
                writer: FrameWriter::new(writer),
                broken: false,
            },
        );
        debug!(peer = %id, ?addr, members = peers.len(), "peer registered");
        id
    }

    /// Removes a peer and shuts down its outbound stream.
    ///
    /// Returns `false` without touching any stream when the peer is already gone.
    pub async fn remove(&self, id: PeerId) -> bool {
        let removed = {
            let mut peers = self.peers.lock().await;
            peers.remove(&id)
        };

        let Some(mut peer) = removed else {
            return false;
        };
        if let Err(error) = peer.writer.shutdown().await {
            debug!(peer = %id, addr = ?peer.addr, ?error, "failed to shut down peer stream");
        }
        debug!(peer = %id, addr = ?peer.addr, "peer removed");
        true
    }

    /// Writes `frame` to every current member.
    ///
    /// A failed or timed-out write is reported and logged, and the pass moves
    /// on to the next peer. Failing peers stay registered until their own
    /// session removes them, but later broadcasts skip them.
    pub async fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let record = frame.encode();
        let mut report = BroadcastReport::default();

        let mut peers = self.peers.lock().await;
        for (id, peer) in peers.iter_mut() {
            if peer.broken {
                report.skipped += 1;
                continue;
            }
            match timeout(self.write_timeout, peer.writer.write_encoded(&record)).await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(source)) => {
                    warn!(peer = %id, addr = ?peer.addr, error = ?source, "failed to deliver frame");
                    peer.broken = true;
                    report.failures.push(DeliveryError::Io { peer: *id, source });
                }
                Err(_) => {
                    warn!(peer = %id, addr = ?peer.addr, timeout = ?self.write_timeout, "frame delivery timed out");
                    peer.broken = true;
                    report.failures.push(DeliveryError::TimedOut { peer: *id });
                }
            }
        }

        report
    }

    pub async fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use tokio::io::{AsyncReadExt, BufReader, DuplexStream};

    use super::*;
    use crate::{codec::FrameReader, error::DecodeError};

    const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

    async fn add_peer(registry: &Registry<DuplexStream>) -> (PeerId, FrameReader<BufReader<DuplexStream>>) {
        let (local, remote) = tokio::io::duplex(4096);
        let id = registry.add(None, local).await;
        (id, FrameReader::new(BufReader::new(remote)))
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer_once() {
        let registry = Registry::new(WRITE_TIMEOUT);
        let mut readers = Vec::new();
        for _ in 0..4 {
            readers.push(add_peer(&registry).await.1);
        }

        let frame = Frame::delivered("alice", "hello all");
        let report = registry.broadcast(&frame).await;
        assert_eq!(report.delivered, 4);
        assert!(report.failures.is_empty());

        for id in registry.peer_ids().await {
            assert!(registry.remove(id).await);
        }
        for mut reader in readers {
            assert_eq!(reader.read_frame().await.expect("delivered"), frame);
            assert!(reader.read_frame().await.unwrap_err().is_end_of_stream());
        }
    }

    #[tokio::test]
    async fn removed_peer_receives_nothing_more() {
        let registry = Registry::new(WRITE_TIMEOUT);
        let (gone, mut gone_reader) = add_peer(&registry).await;
        let (_stays, mut stays_reader) = add_peer(&registry).await;

        assert!(registry.remove(gone).await);
        assert!(!registry.remove(gone).await);
        assert!(!registry.contains(gone).await);
        assert_eq!(registry.len().await, 1);

        let report = registry.broadcast(&Frame::delivered("bob", "still here?")).await;
        assert_eq!(report.attempted(), 1);

        assert!(gone_reader.read_frame().await.unwrap_err().is_end_of_stream());
        assert_eq!(
            stays_reader.read_frame().await.expect("delivered"),
            Frame::delivered("bob", "still here?")
        );
    }

    #[tokio::test]
    async fn failed_peer_does_not_block_others() {
        let registry = Registry::new(WRITE_TIMEOUT);
        let (broken, broken_reader) = add_peer(&registry).await;
        let (_healthy, mut healthy_reader) = add_peer(&registry).await;
        drop(broken_reader);

        let report = registry.broadcast(&Frame::delivered("carol", "hi")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].peer(), broken);
        assert!(matches!(report.failures[0], DeliveryError::Io { .. }));

        // Removal is left to the failing peer's session.
        assert!(registry.contains(broken).await);
        assert_eq!(
            healthy_reader.read_frame().await.expect("delivered"),
            Frame::delivered("carol", "hi")
        );
    }

    #[tokio::test]
    async fn slow_peer_times_out() {
        let registry = Registry::new(Duration::from_millis(50));
        let (stalled_local, _stalled_remote) = tokio::io::duplex(4);
        let stalled = registry.add(None, stalled_local).await;
        let (_fast, mut fast_reader) = add_peer(&registry).await;

        let report = registry
            .broadcast(&Frame::delivered("dave", "this does not fit in four bytes"))
            .await;
        assert_eq!(report.delivered, 1);
        assert!(matches!(
            report.failures.as_slice(),
            [DeliveryError::TimedOut { peer }] if *peer == stalled
        ));
        assert_eq!(
            fast_reader.read_frame().await.expect("delivered"),
            Frame::delivered("dave", "this does not fit in four bytes")
        );
    }

    #[tokio::test]
    async fn nothing_is_appended_after_a_cut_short_record() {
        let registry = Registry::new(Duration::from_millis(50));
        let (stalled_local, mut stalled_remote) = tokio::io::duplex(4);
        let stalled = registry.add(None, stalled_local).await;
        let (_fast, mut fast_reader) = add_peer(&registry).await;

        let first = registry.broadcast(&Frame::delivered("dave", "first")).await;
        assert_eq!(first.failures.len(), 1);

        // Free the pipe so a later write to the stalled peer could go through.
        let mut head = [0u8; 4];
        stalled_remote.read_exact(&mut head).await.expect("partial record");
        assert_eq!(&head, b"M da");

        let second = registry.broadcast(&Frame::delivered("erin", "second")).await;
        assert_eq!(second.delivered, 1);
        assert_eq!(second.skipped, 1);
        assert!(second.failures.is_empty());
        assert_eq!(second.attempted(), 1);

        assert!(registry.remove(stalled).await);
        let mut rest = Vec::new();
        stalled_remote.read_to_end(&mut rest).await.expect("read rest");
        assert!(rest.is_empty(), "unexpected bytes {:?}", String::from_utf8_lossy(&rest));

        assert_eq!(fast_reader.read_frame().await.expect("first"), Frame::delivered("dave", "first"));
        assert_eq!(fast_reader.read_frame().await.expect("second"), Frame::delivered("erin", "second"));
    }

    #[tokio::test]
    async fn peer_added_during_broadcast_sees_none_of_it() {
        let registry = Arc::new(Registry::new(Duration::from_millis(200)));
        let (stalled_local, _stalled_remote) = tokio::io::duplex(4);
        registry.add(None, stalled_local).await;
        let (_fast, mut fast_reader) = add_peer(&registry).await;

        let frame = Frame::delivered("frank", "while you were joining");
        let broadcast = tokio::spawn({
            let registry = Arc::clone(&registry);
            let frame = frame.clone();
            async move { registry.broadcast(&frame).await }
        });
        // Let the broadcast take the lock and stall on the first peer.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (late, mut late_reader) = add_peer(&registry).await;

        let report = broadcast.await.expect("broadcast task");
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(fast_reader.read_frame().await.expect("delivered"), frame);

        assert!(registry.remove(late).await);
        assert!(late_reader.read_frame().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn concurrent_broadcasts_never_interleave() {
        let registry = Arc::new(Registry::new(WRITE_TIMEOUT));
        let mut readers = Vec::new();
        for _ in 0..3 {
            readers.push(add_peer(&registry).await.1);
        }

        let mut tasks = Vec::new();
        for sender in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let text = format!("message from sender {sender} {}", "x".repeat(200));
                registry
                    .broadcast(&Frame::delivered(format!("s{sender}"), text))
                    .await
            }));
        }
        for task in tasks {
            let report = task.await.expect("broadcast task");
            assert_eq!(report.delivered, 3);
        }

        for id in registry.peer_ids().await {
            registry.remove(id).await;
        }
        for mut reader in readers {
            let mut senders = HashSet::new();
            loop {
                match reader.read_frame().await {
                    Ok(Frame::Delivered { name, text }) => {
                        assert!(text.ends_with(&"x".repeat(200)));
                        assert!(senders.insert(name), "duplicate delivery");
                    }
                    Ok(other) => panic!("unexpected frame {other:?}"),
                    Err(DecodeError::EndOfStream) => break,
                    Err(err) => panic!("corrupted stream: {err}"),
                }
            }
            assert_eq!(senders.len(), 8);
        }
    }
}

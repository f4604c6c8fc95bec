//! Coordinating server: serves tile fetches and relays sync messages.
//!
//! Each connection gets a reader task and a writer task. The reader applies
//! inbound intents to the [`SharedGrid`]; every effective change is queued on
//! a single commit channel while its tile is still locked, and one fan-out
//! task forwards commits to every connection except the origin. Peers thus
//! see the changes of a tile in the order the server applied them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{RwLock, mpsc, watch};
use voxgrid_coords::TileKey;
use voxgrid_sync::{SharedGrid, SyncMessage};
use voxgrid_voxel::{TileSnapshotDir, TileStore, Voxel, snapshot};

use crate::framing::{FrameConfig, FrameError, encode_packet, read_packet, write_frame};
use crate::packet::{Control, Packet};

/// Unique identifier for a TCP connection within a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// An encoded frame shared by every connection it is sent to.
type Frame = Arc<[u8]>;

/// Error returned when the connection map is at capacity.
#[derive(Debug)]
pub struct ConnectionLimitReached;

/// Outbound queues of the active connections.
#[derive(Debug)]
pub struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Frame>>>,
    max_connections: usize,
}

impl ConnectionMap {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Registers a connection's outbound queue. Fails at capacity.
    pub async fn insert(
        &self,
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, outbound);
        Ok(())
    }

    pub async fn remove(&self, id: &ConnectionId) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Queues `frame` on every connection except `origin`. Returns the number
    /// of connections it was queued on.
    async fn broadcast(&self, origin: ConnectionId, frame: &Frame) -> usize {
        let map = self.inner.read().await;
        map.iter()
            .filter(|(id, _)| **id != origin)
            .filter(|(_, outbound)| outbound.send(Arc::clone(frame)).is_ok())
            .count()
    }
}

/// Configuration for [`CoordinatorServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `127.0.0.1:8080`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 256.
    pub max_connections: usize,
    pub frame: FrameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 256,
            frame: FrameConfig::default(),
        }
    }
}

/// Where and how tile snapshots are rewritten after each change.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    pub dir: TileSnapshotDir,
    pub pretty: bool,
}

/// An effective change, queued while its tile was locked.
struct Commit {
    origin: ConnectionId,
    frame: Frame,
    snapshot: Option<(TileKey, String)>,
}

/// Per-run state shared by the connection tasks.
struct Relay {
    grid: Arc<SharedGrid>,
    connections: Arc<ConnectionMap>,
    commits: mpsc::UnboundedSender<Commit>,
    frame: FrameConfig,
    /// `Some(pretty)` when snapshots are rewritten on change.
    snapshot_pretty: Option<bool>,
}

impl Relay {
    /// Applies a peer's intent; queues the broadcast (and snapshot) on success.
    fn apply(&self, origin: ConnectionId, msg: &SyncMessage) {
        let result = self.grid.apply_then(msg, |canonical, key, store| {
            self.commit(origin, canonical, key, store)
        });
        match result {
            Ok(Some(Err(e))) => tracing::error!("Failed to encode {}: {e}", msg.kind()),
            Ok(_) => {}
            Err(e) => tracing::warn!("Connection {origin:?} sent invalid {}: {e}", msg.kind()),
        }
    }

    fn commit(
        &self,
        origin: ConnectionId,
        canonical: &SyncMessage,
        key: &TileKey,
        store: &TileStore,
    ) -> Result<(), FrameError> {
        let frame: Frame = encode_packet(canonical)?.into();
        let snapshot = match self.snapshot_pretty {
            Some(pretty) => match snapshot::serialize(store, pretty) {
                Ok(text) => Some((key.clone(), text)),
                Err(e) => {
                    tracing::error!("Failed to encode snapshot of tile {key}: {e}");
                    None
                }
            },
            None => None,
        };
        // The fan-out task outlives every connection task of a run.
        let _ = self.commits.send(Commit {
            origin,
            frame,
            snapshot,
        });
        Ok(())
    }

    /// Encodes a tile's contents as one `TILE` frame, or as several chunks
    /// when the whole tile would exceed the frame size limit.
    fn tile_reply(&self, tile_key: TileKey) -> Result<Vec<Frame>, FrameError> {
        let voxels = self.grid.tile_voxels(&tile_key).unwrap_or_else(|| {
            tracing::warn!("FETCH_TILE for unknown tile {tile_key}");
            Vec::new()
        });
        let max = self.frame.max_payload_size as usize;

        let whole = encode_tile(&tile_key, voxels.clone(), true)?;
        if whole.len() <= max {
            return Ok(vec![whole.into()]);
        }

        let envelope = encode_tile(&tile_key, Vec::new(), false)?.len();
        let mut frames: Vec<Frame> = Vec::new();
        let mut chunk = Vec::new();
        let mut size = envelope;
        for voxel in voxels {
            // One more element plus its separator.
            let len = encode_packet(&voxel)?.len() + 1;
            if envelope + len > max {
                tracing::error!("Voxel {} of tile {tile_key} exceeds the frame limit", voxel.key());
                continue;
            }
            if size + len > max {
                frames.push(encode_tile(&tile_key, std::mem::take(&mut chunk), false)?.into());
                size = envelope;
            }
            size += len;
            chunk.push(voxel);
        }
        frames.push(encode_tile(&tile_key, chunk, true)?.into());
        tracing::debug!("Tile {tile_key} sent in {} chunks", frames.len());
        Ok(frames)
    }
}

fn encode_tile(tile_key: &TileKey, voxels: Vec<Voxel>, last: bool) -> Result<Vec<u8>, FrameError> {
    encode_packet(&Packet::from(Control::Tile {
        tile_key: tile_key.clone(),
        voxels,
        last,
    }))
}

/// TCP server holding the authoritative grid.
pub struct CoordinatorServer {
    config: ServerConfig,
    grid: Arc<SharedGrid>,
    /// Active connection map (public for test inspection).
    pub connections: Arc<ConnectionMap>,
    id_gen: Arc<IdGenerator>,
    snapshots: Option<SnapshotSink>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CoordinatorServer {
    pub fn new(config: ServerConfig, grid: Arc<SharedGrid>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            connections: Arc::new(ConnectionMap::new(config.max_connections)),
            id_gen: Arc::new(IdGenerator::new()),
            config,
            grid,
            snapshots: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Rewrite the touched tile's snapshot after every effective change.
    pub fn with_snapshots(mut self, sink: SnapshotSink) -> Self {
        self.snapshots = Some(sink);
        self
    }

    pub fn grid(&self) -> &Arc<SharedGrid> {
        &self.grid
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Coordinator listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener.
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let persist_tx = self.snapshots.as_ref().map(|sink| spawn_persister(sink.dir.clone()));
        tokio::spawn(fan_out(commit_rx, Arc::clone(&self.connections), persist_tx));

        let relay = Arc::new(Relay {
            grid: Arc::clone(&self.grid),
            connections: Arc::clone(&self.connections),
            commits: commit_tx,
            frame: self.config.frame.clone(),
            snapshot_pretty: self.snapshots.as_ref().map(|sink| sink.pretty),
        });

        let mut shutdown_rx = self.shutdown_rx.clone();
        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => break Err(e),
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!("Failed to set TCP_NODELAY for {peer_addr}: {e}");
                    }

                    let id = self.id_gen.next_id();
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    if self.connections.insert(id, outbound_tx.clone()).await.is_err() {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }
                    tracing::info!("Accepted connection {id:?} from {peer_addr}");

                    let (reader, writer) = stream.into_split();
                    tokio::spawn(write_loop(id, writer, outbound_rx, self.config.frame.clone()));

                    let relay = Arc::clone(&relay);
                    let mut task_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        read_loop(id, reader, outbound_tx, &relay, &mut task_shutdown).await;
                        relay.connections.remove(&id).await;
                        tracing::info!("Connection {id:?} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Coordinator shutting down");
                        break Ok(());
                    }
                }
            }
        };

        // The fan-out stops once every connection task has dropped its relay.
        result
    }

    /// Signal the server and all connection tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Per-connection reader loop.
async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    outbound: mpsc::UnboundedSender<Frame>,
    relay: &Relay,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            packet = read_packet::<Packet, _>(&mut reader, &relay.frame) => {
                match packet {
                    Ok(Packet::Sync(msg)) => relay.apply(id, &msg),
                    Ok(Packet::Control(Control::FetchTile { tile_key })) => {
                        match relay.tile_reply(tile_key) {
                            Ok(frames) => {
                                if frames.into_iter().any(|frame| outbound.send(frame).is_err()) {
                                    break;
                                }
                            }
                            Err(e) => tracing::error!("Failed to encode tile reply: {e}"),
                        }
                    }
                    Ok(Packet::Control(Control::Tile { tile_key, .. })) => {
                        tracing::warn!("Connection {id:?} sent unexpected TILE {tile_key}");
                    }
                    Err(FrameError::Malformed(e)) => {
                        tracing::warn!("Connection {id:?} sent a malformed packet: {e}");
                    }
                    Err(FrameError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::warn!("Connection {id:?} read failed: {e}");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Per-connection writer loop. Ends when every sender of the queue is gone,
/// which closes the write half.
async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    frame: FrameConfig,
) {
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload, &frame).await {
            tracing::warn!("Connection {id:?} write failed: {e}");
            break;
        }
    }
}

async fn fan_out(
    mut commits: mpsc::UnboundedReceiver<Commit>,
    connections: Arc<ConnectionMap>,
    persist: Option<mpsc::UnboundedSender<(TileKey, String)>>,
) {
    while let Some(commit) = commits.recv().await {
        let sent = connections.broadcast(commit.origin, &commit.frame).await;
        tracing::trace!("Relayed change from {:?} to {sent} peers", commit.origin);
        if let (Some(persist), Some(snapshot)) = (&persist, commit.snapshot) {
            let _ = persist.send(snapshot);
        }
    }
}

/// Writes snapshots sequentially, so the last write of a tile is its latest state.
fn spawn_persister(dir: TileSnapshotDir) -> mpsc::UnboundedSender<(TileKey, String)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(TileKey, String)>();
    tokio::spawn(async move {
        while let Some((key, text)) = rx.recv().await {
            let dir = dir.clone();
            let written = tokio::task::spawn_blocking(move || dir.write_raw(&key, &text)).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Failed to save tile snapshot: {e}"),
                Err(e) => tracing::error!("Snapshot writer panicked: {e}"),
            }
        }
    });
    tx
}

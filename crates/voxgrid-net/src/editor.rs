//! Client driver: keeps a local [`World`] in sync with a coordinating server.
//!
//! On (re)connect the editor fetches every tile of the grid, in grid order,
//! and applies the replies with attach semantics. Live updates received
//! meanwhile are buffered by the [`SyncSession`]; local intents stay queued in
//! their channel until the session is live.

use std::net::SocketAddr;

use glam::DVec3;
use tokio::sync::{mpsc, watch};
use voxgrid_sync::{Presenter, SessionPhase, SyncError, SyncMessage, SyncSession, World};
use voxgrid_voxel::Color;

use crate::client::SyncClient;
use crate::framing::{FrameConfig, FrameError};
use crate::packet::{Control, Packet};
use crate::reconnection::{ReconnectConfig, ReconnectError, ReconnectState, reconnect_loop};

/// An edit requested by the local user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalIntent {
    Attach { position: DVec3, color: Color },
    Detach { position: DVec3 },
}

/// Connection settings for an [`Editor`].
#[derive(Debug, Clone)]
pub struct EditorConfig {
    pub server_addr: SocketAddr,
    pub frame: FrameConfig,
    pub reconnect: ReconnectConfig,
}

/// Errors that end an editor session.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("failed to connect: {0}")]
    Connect(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Reconnect(#[from] ReconnectError),

    #[error("connection lost")]
    ConnectionLost,

    #[error("not connected")]
    NotConnected,
}

/// What woke the run loop.
enum Step {
    Packet(Option<Packet>),
    Intent(Option<LocalIntent>),
    Shutdown,
}

/// A local world plus the connection and sync state that feed it.
#[derive(Debug)]
pub struct Editor {
    config: EditorConfig,
    world: World,
    session: SyncSession,
    client: Option<SyncClient>,
    backoff: ReconnectState,
}

impl Editor {
    pub fn new(config: EditorConfig, world: World) -> Self {
        Self {
            backoff: ReconnectState::new(config.reconnect.clone()),
            config,
            world,
            session: SyncSession::new(),
            client: None,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Connects once (no retries) and runs the initial sync.
    pub async fn connect<P: Presenter + ?Sized>(
        &mut self,
        presenter: &mut P,
    ) -> Result<(), EditorError> {
        let client = SyncClient::connect(self.config.server_addr, self.config.frame.clone()).await?;
        self.client = Some(client);
        self.sync(presenter).await
    }

    /// Requests every tile and processes packets until the bulk load completes.
    async fn sync<P: Presenter + ?Sized>(&mut self, presenter: &mut P) -> Result<(), EditorError> {
        let Some(client) = self.client.as_mut() else {
            return Err(EditorError::NotConnected);
        };

        for tile_key in self.session.begin(&self.world) {
            client.send(&Control::FetchTile { tile_key }.into()).await?;
        }

        while !self.session.is_live() {
            match client.recv().await {
                Some(packet) => handle_packet(&mut self.session, &mut self.world, packet, presenter),
                None => {
                    self.session.disconnect();
                    self.client = None;
                    return Err(EditorError::ConnectionLost);
                }
            }
        }
        Ok(())
    }

    /// Applies a local intent and forwards it if the world changed.
    ///
    /// Returns the forwarded message, or `None` for a refused intent (attach
    /// to an occupied position, detach of an empty one).
    pub async fn submit<P: Presenter + ?Sized>(
        &mut self,
        intent: LocalIntent,
        presenter: &mut P,
    ) -> Result<Option<SyncMessage>, EditorError> {
        let Some(client) = self.client.as_mut() else {
            return Err(EditorError::NotConnected);
        };

        let msg = match intent {
            LocalIntent::Attach { position, color } => {
                self.world.attach_local(position, color, presenter)?
            }
            LocalIntent::Detach { position } => self.world.detach_local(position, presenter)?,
        };

        match &msg {
            Some(msg) => client.send(&Packet::Sync(msg.clone())).await?,
            None => tracing::debug!("Local {intent:?} changed nothing; not sent"),
        }
        Ok(msg)
    }

    /// Serves live updates and local intents until `shutdown` fires or the
    /// intent channel closes. Reconnects and re-syncs when the link drops.
    pub async fn run<P: Presenter + ?Sized>(
        &mut self,
        intents: &mut mpsc::Receiver<LocalIntent>,
        presenter: &mut P,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), EditorError> {
        loop {
            if self.client.is_none() || !self.session.is_live() {
                tokio::select! {
                    result = self.reconnect(presenter) => result?,
                    _ = shutdown_signalled(shutdown) => break,
                }
                continue;
            }

            let Some(client) = self.client.as_mut() else {
                continue;
            };
            // Intents are only polled here, i.e. while the session is live.
            let step = tokio::select! {
                packet = client.recv() => Step::Packet(packet),
                intent = intents.recv() => Step::Intent(intent),
                _ = shutdown_signalled(shutdown) => Step::Shutdown,
            };

            match step {
                Step::Packet(Some(packet)) => {
                    handle_packet(&mut self.session, &mut self.world, packet, presenter)
                }
                Step::Packet(None) => {
                    tracing::warn!("Lost connection to {}", self.config.server_addr);
                    self.session.disconnect();
                    self.client = None;
                }
                Step::Intent(Some(intent)) => match self.submit(intent, presenter).await {
                    Ok(_) => {}
                    Err(EditorError::Sync(e)) => tracing::warn!("Refused local {intent:?}: {e}"),
                    Err(EditorError::Frame(e)) => {
                        tracing::warn!("Failed to forward local {intent:?}: {e}");
                        self.session.disconnect();
                        self.client = None;
                    }
                    Err(e) => return Err(e),
                },
                Step::Intent(None) | Step::Shutdown => break,
            }
        }

        self.disconnect();
        Ok(())
    }

    /// Reconnects with backoff and re-runs the initial sync until it succeeds.
    /// The backoff only starts over once a sync has completed.
    async fn reconnect<P: Presenter + ?Sized>(&mut self, presenter: &mut P) -> Result<(), EditorError> {
        loop {
            let client = reconnect_loop(
                self.config.server_addr,
                &mut self.backoff,
                self.config.frame.clone(),
            )
            .await?;
            self.client = Some(client);
            match self.sync(presenter).await {
                Ok(()) => {
                    self.backoff.reset();
                    return Ok(());
                }
                Err(EditorError::ConnectionLost | EditorError::Frame(_)) => {
                    tracing::warn!("Connection lost during initial sync; retrying");
                    self.session.disconnect();
                    self.client = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.disconnect();
        }
        self.session.disconnect();
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn handle_packet<P: Presenter + ?Sized>(
    session: &mut SyncSession,
    world: &mut World,
    packet: Packet,
    presenter: &mut P,
) {
    match packet {
        Packet::Sync(msg) => {
            let kind = msg.kind();
            if let Err(e) = session.on_remote(msg, world, presenter) {
                tracing::warn!("Rejected remote {kind}: {e}");
            }
        }
        Packet::Control(Control::Tile { tile_key, voxels, last }) => {
            let load = if last {
                session.on_tile(&tile_key, voxels, world, presenter)
            } else {
                session.on_tile_part(&tile_key, voxels, world, presenter)
            };
            tracing::debug!(
                "Tile {tile_key}: {} inserted, {} rejected",
                load.inserted,
                load.rejected
            );
        }
        Packet::Control(Control::FetchTile { tile_key }) => {
            tracing::warn!("Ignoring FETCH_TILE {tile_key} sent to a client");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use voxgrid_coords::TileEngine;
    use voxgrid_sync::{ChangeLog, NullPresenter, SharedGrid, VoxelChange};
    use voxgrid_voxel::{PositionKey, Voxel};

    use super::*;
    use crate::server::{CoordinatorServer, ServerConfig};

    fn engine() -> TileEngine {
        TileEngine::new(16.0, 4.0).unwrap()
    }

    async fn start_server(grid: SharedGrid) -> (SocketAddr, Arc<CoordinatorServer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener, ServerConfig::default(), Arc::new(grid));
        (addr, server)
    }

    fn serve(listener: TcpListener, config: ServerConfig, grid: Arc<SharedGrid>) -> Arc<CoordinatorServer> {
        let server = Arc::new(CoordinatorServer::new(config, grid));
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        server
    }

    fn editor(addr: SocketAddr) -> Editor {
        let config = EditorConfig {
            server_addr: addr,
            frame: FrameConfig::default(),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_attempts: 5,
                ..Default::default()
            },
        };
        Editor::new(config, World::new(engine()))
    }

    fn red() -> Color {
        Color::new(0xff0000).unwrap()
    }

    #[tokio::test]
    async fn test_initial_sync_loads_server_state() {
        let grid = SharedGrid::new(engine());
        grid.apply(&SyncMessage::attach(Voxel::new(DVec3::ONE, red()))).unwrap();
        grid.apply(&SyncMessage::attach(Voxel::new(DVec3::new(-7.0, 1.0, 7.0), red())))
            .unwrap();
        let (addr, _server) = start_server(grid).await;

        let mut editor = editor(addr);
        let mut log = ChangeLog::new();
        editor.connect(&mut log).await.unwrap();

        assert_eq!(editor.phase(), SessionPhase::Live);
        assert_eq!(editor.world().grid().voxel_count(), 2);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_forwards_only_effective_intents() {
        let (addr, server) = start_server(SharedGrid::new(engine())).await;
        let mut editor = editor(addr);
        editor.connect(&mut NullPresenter).await.unwrap();

        let attach = LocalIntent::Attach {
            position: DVec3::ONE,
            color: red(),
        };
        assert!(editor.submit(attach, &mut NullPresenter).await.unwrap().is_some());
        assert!(editor.submit(attach, &mut NullPresenter).await.unwrap().is_none());

        let detach = LocalIntent::Detach {
            position: DVec3::new(5.0, 1.0, 5.0),
        };
        assert!(editor.submit(detach, &mut NullPresenter).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.grid().voxel_count(), 1);
    }

    #[tokio::test]
    async fn test_outside_map_intent_refused_locally() {
        let (addr, _server) = start_server(SharedGrid::new(engine())).await;
        let mut editor = editor(addr);
        editor.connect(&mut NullPresenter).await.unwrap();

        let result = editor
            .submit(
                LocalIntent::Attach {
                    position: DVec3::new(50.0, 1.0, 0.0),
                    color: red(),
                },
                &mut NullPresenter,
            )
            .await;
        assert!(matches!(result, Err(EditorError::Sync(SyncError::OutsideMap(_)))));
    }

    #[tokio::test]
    async fn test_two_editors_converge() {
        let (addr, _server) = start_server(SharedGrid::new(engine())).await;

        // Editor B runs its loop in the background and reports changes.
        let (change_tx, mut change_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (_intent_tx, mut intent_rx) = mpsc::channel::<LocalIntent>(8);
        let (live_tx, live_rx) = tokio::sync::oneshot::channel();
        let watcher = tokio::spawn(async move {
            let mut b = editor(addr);
            let mut presenter = ForwardingPresenter(change_tx);
            b.connect(&mut presenter).await.unwrap();
            let _ = live_tx.send(());
            b.run(&mut intent_rx, &mut presenter, &mut stop_rx).await.unwrap();
            b
        });
        live_rx.await.unwrap();

        let mut a = editor(addr);
        a.connect(&mut NullPresenter).await.unwrap();
        let position = DVec3::new(-3.0, 1.0, 3.0);
        a.submit(LocalIntent::Attach { position, color: red() }, &mut NullPresenter)
            .await
            .unwrap();
        a.submit(LocalIntent::Detach { position }, &mut NullPresenter)
            .await
            .unwrap();

        let key = PositionKey::from_position(position);
        let first = tokio::time::timeout(Duration::from_secs(2), change_rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), change_rx.recv())
            .await
            .unwrap();
        assert!(matches!(first, Some(VoxelChange::Attached { key: k, .. }) if k == key));
        assert_eq!(second, Some(VoxelChange::Detached { key }));

        stop_tx.send(true).unwrap();
        let b = watcher.await.unwrap();
        assert_eq!(b.world().grid(), a.world().grid());
        assert_eq!(b.phase(), SessionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_initial_sync_with_oversized_tile() {
        let frame = FrameConfig {
            max_payload_size: 16 * 1024,
        };
        let grid = SharedGrid::new(engine());
        for y in 0..50 {
            for x in [0.5, 1.5, 2.5, 3.5] {
                for z in [0.5, 1.5, 2.5, 3.5] {
                    let position = DVec3::new(x, y as f64 + 0.5, z);
                    grid.apply(&SyncMessage::attach(Voxel::new(position, red()))).unwrap();
                }
            }
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig {
            frame: frame.clone(),
            ..Default::default()
        };
        let server = serve(listener, config, Arc::new(grid));

        let mut editor = editor(addr);
        editor.config.frame = frame;
        let mut log = ChangeLog::new();
        editor.connect(&mut log).await.unwrap();

        assert_eq!(editor.phase(), SessionPhase::Live);
        assert_eq!(editor.world().grid().voxel_count(), 800);
        assert_eq!(editor.world().grid(), &server.grid().to_grid());
        assert_eq!(log.len(), 800);
    }

    #[tokio::test]
    async fn test_run_resyncs_after_server_restart() {
        let grid = Arc::new(SharedGrid::new(engine()));
        let before = DVec3::new(1.0, 1.0, 1.0);
        let during = DVec3::new(-5.0, 1.0, 5.0);
        grid.apply(&SyncMessage::attach(Voxel::new(before, red()))).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let first = serve(listener, ServerConfig::default(), Arc::clone(&grid));

        let (change_tx, mut change_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (_intent_tx, mut intent_rx) = mpsc::channel::<LocalIntent>(8);
        let (live_tx, live_rx) = tokio::sync::oneshot::channel();
        let watcher = tokio::spawn(async move {
            let mut editor = editor(addr);
            editor.config.reconnect.max_attempts = 50;
            editor.config.reconnect.max_delay = Duration::from_millis(50);
            editor.backoff = ReconnectState::new(editor.config.reconnect.clone());
            let mut presenter = ForwardingPresenter(change_tx);
            editor.connect(&mut presenter).await.unwrap();
            let _ = live_tx.send(());
            editor.run(&mut intent_rx, &mut presenter, &mut stop_rx).await.unwrap();
            editor
        });
        live_rx.await.unwrap();
        let first_change = tokio::time::timeout(Duration::from_secs(2), change_rx.recv())
            .await
            .unwrap();
        assert!(matches!(first_change, Some(VoxelChange::Attached { .. })));

        first.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Changed while no server is up: only a re-sync can deliver it.
        grid.apply(&SyncMessage::attach(Voxel::new(during, red()))).unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let _second = serve(listener, ServerConfig::default(), Arc::clone(&grid));

        let resynced = tokio::time::timeout(Duration::from_secs(5), change_rx.recv())
            .await
            .expect("editor never re-synced");
        let key = PositionKey::from_position(during);
        assert!(matches!(resynced, Some(VoxelChange::Attached { key: k, .. }) if k == key));

        stop_tx.send(true).unwrap();
        let editor = watcher.await.unwrap();
        assert_eq!(editor.world().grid(), &grid.to_grid());
        assert_eq!(editor.backoff.attempts(), 0);
        // Replaying the voxel that survived the restart notified nobody.
        assert!(change_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut editor = editor(addr);
        assert!(matches!(
            editor.connect(&mut NullPresenter).await,
            Err(EditorError::Connect(_))
        ));
    }

    struct ForwardingPresenter(mpsc::UnboundedSender<VoxelChange>);

    impl Presenter for ForwardingPresenter {
        fn voxel_attached(&mut self, key: &PositionKey, voxel: &Voxel) {
            let _ = self.0.send(VoxelChange::Attached {
                key: key.clone(),
                voxel: *voxel,
            });
        }

        fn voxel_detached(&mut self, key: &PositionKey) {
            let _ = self.0.send(VoxelChange::Detached { key: key.clone() });
        }
    }
}

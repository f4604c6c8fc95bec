//! TCP client side of a voxgrid connection.
//!
//! A background task decodes inbound packets into a channel; the connection
//! state is published on a [`watch`] channel so any number of observers can
//! react without polling.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::framing::{FrameConfig, FrameError, read_packet, write_packet};
use crate::packet::Packet;

/// Inbound packets buffered between the reader task and the consumer.
const INBOUND_QUEUE: usize = 1024;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
#[derive(Debug)]
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Starts out [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// A connection to a coordinating server.
#[derive(Debug)]
pub struct SyncClient {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Packet>,
    state: Arc<ConnectionStateWatch>,
    frame: FrameConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncClient {
    /// Connects to `addr` and starts the reader task.
    pub async fn connect(addr: SocketAddr, frame: FrameConfig) -> std::io::Result<Self> {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        stream.set_nodelay(true)?;
        state.set(ConnectionState::Connected);
        tracing::info!("Connected to {addr}");

        let (reader, writer) = stream.into_split();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reader_state = Arc::clone(&state);
        let reader_frame = frame.clone();
        tokio::spawn(async move {
            read_loop(reader, inbound_tx, &reader_state, &reader_frame, shutdown_rx).await;
        });

        Ok(Self {
            writer,
            inbound,
            state,
            frame,
            shutdown_tx,
        })
    }

    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.current() == ConnectionState::Connected
    }

    /// Sends one packet.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), FrameError> {
        let result = write_packet(&mut self.writer, packet, &self.frame).await;
        if let Err(FrameError::Io(_) | FrameError::ConnectionClosed) = &result {
            self.state.set(ConnectionState::Disconnected);
        }
        result
    }

    /// Next inbound packet; `None` once the connection is gone and every
    /// packet received before that has been returned.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.inbound.recv().await
    }

    /// Stops the reader task and marks the connection closed.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<Packet>,
    state: &ConnectionStateWatch,
    frame: &FrameConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            packet = read_packet::<Packet, _>(&mut reader, frame) => {
                match packet {
                    Ok(packet) => {
                        if inbound.send(packet).await.is_err() {
                            break;
                        }
                    }
                    Err(FrameError::Malformed(e)) => {
                        tracing::warn!("Ignoring malformed packet from server: {e}");
                    }
                    Err(FrameError::ConnectionClosed) => {
                        tracing::info!("Server closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Connection read failed: {e}");
                        break;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    state.set(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::packet::Control;

    /// Accepts one connection and echoes every frame back.
    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let config = FrameConfig::default();
            while let Ok(packet) = read_packet::<Packet, _>(&mut stream, &config).await {
                if write_packet(&mut stream, &packet, &config).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    fn fetch(key: &str) -> Packet {
        Packet::from(Control::FetchTile {
            tile_key: key.parse().unwrap(),
        })
    }

    #[tokio::test]
    async fn test_client_connects_to_server() {
        let addr = echo_server().await;
        let client = SyncClient::connect(addr, FrameConfig::default()).await.unwrap();
        assert_eq!(client.state().current(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(SyncClient::connect(addr, FrameConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_and_recv_roundtrip() {
        let addr = echo_server().await;
        let mut client = SyncClient::connect(addr, FrameConfig::default()).await.unwrap();

        client.send(&fetch("0_0")).await.unwrap();
        client.send(&fetch("0_1")).await.unwrap();
        assert_eq!(client.recv().await, Some(fetch("0_0")));
        assert_eq!(client.recv().await, Some(fetch("0_1")));
    }

    #[tokio::test]
    async fn test_server_close_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = SyncClient::connect(addr, FrameConfig::default()).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(2), client.recv()).await.unwrap();
        assert!(next.is_none());
        assert_eq!(client.state().current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_state_transitions() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);
        watch.set(ConnectionState::Connecting);
        assert_eq!(watch.current(), ConnectionState::Connecting);
        watch.set(ConnectionState::Connected);
        assert_eq!(watch.current(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_state_watch_subscriber_receives_updates() {
        let addr = echo_server().await;
        let client = SyncClient::connect(addr, FrameConfig::default()).await.unwrap();
        let mut rx = client.state().subscribe();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);

        client.disconnect();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }
}

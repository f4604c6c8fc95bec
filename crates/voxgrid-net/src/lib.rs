//! TCP transport for voxgrid: JSON framing, the coordinating server, and the
//! client-side editor driver.

pub mod client;
pub mod editor;
pub mod framing;
pub mod packet;
pub mod reconnection;
pub mod server;

pub use client::{ConnectionState, ConnectionStateWatch, SyncClient};
pub use editor::{Editor, EditorConfig, EditorError, LocalIntent};
pub use framing::{FrameConfig, FrameError, read_frame, read_packet, write_frame, write_packet};
pub use packet::{Control, Packet};
pub use reconnection::{ReconnectConfig, ReconnectError, ReconnectState, reconnect_loop};
pub use server::{
    ConnectionId, ConnectionLimitReached, ConnectionMap, CoordinatorServer, IdGenerator,
    ServerConfig, SnapshotSink,
};

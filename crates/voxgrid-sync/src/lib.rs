//! Attach/detach synchronization: intents, idempotent application to an owned
//! world, the initial bulk-load state machine, and the server's shared grid.

pub mod coordinator;
pub mod error;
pub mod message;
pub mod presenter;
pub mod session;
pub mod world;

pub use coordinator::SharedGrid;
pub use error::SyncError;
pub use message::{AttachIntent, DetachIntent, SyncMessage};
pub use presenter::{ChangeLog, NullPresenter, Presenter, VoxelChange};
pub use session::{Delivery, SessionPhase, SyncSession, TileLoad};
pub use world::{Applied, Resolved, World, resolve};

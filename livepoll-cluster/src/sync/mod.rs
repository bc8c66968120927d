//! Cross-replica synchronization
//!
//! The hub routes events to the connections of one process; the fan-out bus
//! carries tally and lifecycle events between processes; presence and
//! lifecycle sit on top of both.

pub mod events;
pub mod fanout;
pub mod lifecycle;
pub mod presence;
pub mod room_hub;

pub use events::PollEvent;
pub use fanout::{FanoutBus, PublishRequest};
pub use lifecycle::PollLifecycleManager;
pub use presence::{JoinOutcome, PresenceTracker, RoomCount};
pub use room_hub::{ConnectionId, RoomMessageHub};

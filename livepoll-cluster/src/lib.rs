pub mod sync;

pub use sync::{
    ConnectionId, FanoutBus, JoinOutcome, PollEvent, PollLifecycleManager, PresenceTracker,
    PublishRequest, RoomCount, RoomMessageHub,
};

//! Per-poll viewer presence
//!
//! Tracks which voters are watching which poll on this replica. Presence is
//! deduplicated by voter identity, not by connection: a voter open in two
//! tabs counts once. A voter is present in at most one poll room at a time;
//! joining another room evicts the old membership first.
//!
//! Counts are per-replica only and are not aggregated across the fleet.

use dashmap::DashMap;
use livepoll_core::models::{PollId, VoterId};
use std::collections::HashSet;
use tracing::debug;

/// A room and its distinct-voter count after a presence transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCount {
    pub poll_id: PollId,
    pub viewers: usize,
}

/// Result of a join: the room actually joined, plus the room that was left
/// behind when the voter was already present elsewhere.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub joined: RoomCount,
    pub previous: Option<RoomCount>,
}

#[derive(Default)]
pub struct PresenceTracker {
    /// Map of poll_id -> distinct voters present
    room_voters: DashMap<PollId, HashSet<VoterId>>,

    /// Map of voter_id -> the single room the voter occupies
    voter_room: DashMap<VoterId, PollId>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            room_voters: DashMap::new(),
            voter_room: DashMap::new(),
        }
    }

    /// Add a voter to a poll room, evicting any previous membership.
    /// Re-joining the same room is idempotent.
    pub fn join(&self, voter_id: &VoterId, poll_id: &PollId) -> JoinOutcome {
        let previous = match self.voter_room.insert(voter_id.clone(), poll_id.clone()) {
            Some(old_poll) if old_poll != *poll_id => {
                let viewers = self.remove_from_room(&old_poll, voter_id);
                debug!(
                    voter_id = %voter_id.as_str(),
                    old_poll = %old_poll.as_str(),
                    new_poll = %poll_id.as_str(),
                    "Voter switched poll rooms"
                );
                Some(RoomCount {
                    poll_id: old_poll,
                    viewers,
                })
            }
            _ => None,
        };

        let viewers = {
            let mut voters = self.room_voters.entry(poll_id.clone()).or_default();
            voters.insert(voter_id.clone());
            voters.len()
        };

        JoinOutcome {
            joined: RoomCount {
                poll_id: poll_id.clone(),
                viewers,
            },
            previous,
        }
    }

    /// Remove a voter from a poll room. Returns the room's remaining count,
    /// or None when the voter was not present there.
    pub fn leave(&self, voter_id: &VoterId, poll_id: &PollId) -> Option<RoomCount> {
        let was_present = self
            .voter_room
            .remove_if(voter_id, |_, room| room == poll_id)
            .is_some();
        if !was_present {
            return None;
        }

        let viewers = self.remove_from_room(poll_id, voter_id);
        Some(RoomCount {
            poll_id: poll_id.clone(),
            viewers,
        })
    }

    /// Drop every membership the voter holds (at most one). Called when the
    /// voter's connection goes away; an explicit re-join is required after
    /// reconnecting.
    pub fn on_disconnect(&self, voter_id: &VoterId) -> Option<RoomCount> {
        let (_, poll_id) = self.voter_room.remove(voter_id)?;
        let viewers = self.remove_from_room(&poll_id, voter_id);
        Some(RoomCount { poll_id, viewers })
    }

    /// Distinct-voter count of a room on this replica
    #[must_use]
    pub fn viewer_count(&self, poll_id: &PollId) -> usize {
        self.room_voters.get(poll_id).map_or(0, |v| v.len())
    }

    /// Number of rooms with at least one viewer
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.room_voters.len()
    }

    fn remove_from_room(&self, poll_id: &PollId, voter_id: &VoterId) -> usize {
        let remaining = if let Some(mut voters) = self.room_voters.get_mut(poll_id) {
            voters.remove(voter_id);
            voters.len()
        } else {
            0
        };

        if remaining == 0 {
            // Delete empty rooms so the map only holds live state
            self.room_voters.remove_if(poll_id, |_, v| v.is_empty());
        }

        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_then_leave_restores_count() {
        let presence = PresenceTracker::new();
        let poll = PollId::new();
        let resident = VoterId::new();
        let visitor = VoterId::new();

        presence.join(&resident, &poll);
        assert_eq!(presence.viewer_count(&poll), 1);

        let outcome = presence.join(&visitor, &poll);
        assert_eq!(outcome.joined.viewers, 2);

        let left = presence.leave(&visitor, &poll).unwrap();
        assert_eq!(left.viewers, 1);
        assert_eq!(presence.viewer_count(&poll), 1);
    }

    #[test]
    fn test_two_connections_one_voter_count_once() {
        let presence = PresenceTracker::new();
        let poll = PollId::new();
        let voter = VoterId::new();

        // Same voter joining twice (two tabs) is idempotent
        presence.join(&voter, &poll);
        let outcome = presence.join(&voter, &poll);

        assert_eq!(outcome.joined.viewers, 1);
        assert!(outcome.previous.is_none());
        assert_eq!(presence.viewer_count(&poll), 1);
    }

    #[test]
    fn test_joining_second_poll_leaves_first() {
        let presence = PresenceTracker::new();
        let poll1 = PollId::new();
        let poll2 = PollId::new();
        let voter = VoterId::new();
        let other = VoterId::new();

        presence.join(&other, &poll1);
        presence.join(&voter, &poll1);
        assert_eq!(presence.viewer_count(&poll1), 2);

        let outcome = presence.join(&voter, &poll2);
        let previous = outcome.previous.unwrap();
        assert_eq!(previous.poll_id, poll1);
        assert_eq!(previous.viewers, 1);
        assert_eq!(outcome.joined.viewers, 1);
        assert_eq!(presence.viewer_count(&poll1), 1);
        assert_eq!(presence.viewer_count(&poll2), 1);
    }

    #[test]
    fn test_empty_room_is_deleted() {
        let presence = PresenceTracker::new();
        let poll = PollId::new();
        let voter = VoterId::new();

        presence.join(&voter, &poll);
        assert_eq!(presence.room_count(), 1);

        presence.leave(&voter, &poll);
        assert_eq!(presence.room_count(), 0);
    }

    #[test]
    fn test_leave_without_membership_is_none() {
        let presence = PresenceTracker::new();
        assert!(presence.leave(&VoterId::new(), &PollId::new()).is_none());
    }

    #[test]
    fn test_disconnect_leaves_occupied_room() {
        let presence = PresenceTracker::new();
        let poll = PollId::new();
        let voter = VoterId::new();
        let other = VoterId::new();

        presence.join(&other, &poll);
        presence.join(&voter, &poll);

        let left = presence.on_disconnect(&voter).unwrap();
        assert_eq!(left.poll_id, poll);
        assert_eq!(left.viewers, 1);

        // Second disconnect for the same voter is a no-op
        assert!(presence.on_disconnect(&voter).is_none());
    }
}

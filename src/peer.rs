//! Peer table.
//!
//! Every node keeps a table of the fleet, keyed by node id. Entries are
//! created on the first frame heard from a sender and enriched by
//! announcements. The core never removes entries; liveness is inferred
//! from `last_seen` by whoever reads the table.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::identity::{NodeId, NodeRole};
use crate::protocol::PeerAnnouncement;

/// One known peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub ip: Ipv4Addr,
    pub role: NodeRole,
    pub group: String,
    pub device_name: String,
    /// Local monotonic milliseconds when this peer was last heard.
    pub last_seen_ms: u64,
}

/// Table of all peers ever heard, keyed by id.
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<NodeId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that any frame was heard from `id`.
    ///
    /// Creates a placeholder entry on first contact; announcements fill
    /// in the rest.
    pub fn touch(&mut self, id: NodeId, now_ms: u64) {
        self.peers
            .entry(id)
            .and_modify(|p| p.last_seen_ms = now_ms)
            .or_insert_with(|| Peer {
                id,
                ip: Ipv4Addr::UNSPECIFIED,
                role: NodeRole::Idle,
                group: String::new(),
                device_name: String::new(),
                last_seen_ms: now_ms,
            });
    }

    /// Insert-or-update from a received announcement.
    pub fn apply_announcement(&mut self, id: NodeId, ann: &PeerAnnouncement, now_ms: u64) {
        let entry = self.peers.entry(id).or_insert_with(|| Peer {
            id,
            ip: ann.ip,
            role: ann.role,
            group: ann.group.clone(),
            device_name: ann.device_name.clone(),
            last_seen_ms: now_ms,
        });
        entry.ip = ann.ip;
        entry.role = ann.role;
        entry.group = ann.group.clone();
        entry.device_name = ann.device_name.clone();
        entry.last_seen_ms = now_ms;
    }

    pub fn get(&self, id: &NodeId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of all peers, ordered by id for stable output.
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<_> = self.peers.values().cloned().collect();
        peers.sort_by_key(|p| p.id);
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(group: &str) -> PeerAnnouncement {
        PeerAnnouncement {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            role: NodeRole::Slave,
            group: group.into(),
            device_name: "desk".into(),
        }
    }

    #[test]
    fn test_touch_creates_placeholder() {
        let mut table = PeerTable::new();
        let id = NodeId::from_raw(5);

        table.touch(id, 100);
        let peer = table.get(&id).unwrap();
        assert_eq!(peer.last_seen_ms, 100);
        assert_eq!(peer.ip, Ipv4Addr::UNSPECIFIED);

        table.touch(id, 250);
        assert_eq!(table.get(&id).unwrap().last_seen_ms, 250);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_announcement_updates_in_place() {
        let mut table = PeerTable::new();
        let id = NodeId::from_raw(7);

        table.apply_announcement(id, &announcement("a"), 10);
        assert_eq!(table.get(&id).unwrap().group, "a");

        table.apply_announcement(id, &announcement("b"), 20);
        let peer = table.get(&id).unwrap();
        assert_eq!(peer.group, "b");
        assert_eq!(peer.last_seen_ms, 20);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_touch_does_not_clobber_announced_fields() {
        let mut table = PeerTable::new();
        let id = NodeId::from_raw(7);

        table.apply_announcement(id, &announcement("room"), 10);
        table.touch(id, 30);

        let peer = table.get(&id).unwrap();
        assert_eq!(peer.group, "room");
        assert_eq!(peer.device_name, "desk");
        assert_eq!(peer.last_seen_ms, 30);
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut table = PeerTable::new();
        table.touch(NodeId::from_raw(9), 0);
        table.touch(NodeId::from_raw(2), 0);
        table.touch(NodeId::from_raw(5), 0);

        let ids: Vec<u64> = table.snapshot().iter().map(|p| p.id.as_u64()).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }
}

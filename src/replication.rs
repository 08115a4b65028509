//! Replication pacing and tracking.
//!
//! The building blocks the node uses to keep preset sets convergent on
//! a lossy medium: a deadline-ordered broadcast queue (redundant send
//! rounds are scheduled, never slept), the manifest and directed-pull
//! queues of the anti-entropy exchange, and the tracker that keeps a
//! node from pulling the same preset twice in quick succession.
//!
//! Any individual send round is lost with some probability p; three
//! rounds with per-fragment dedup push that to p³, and the periodic
//! manifest exchange catches whatever still slipped through.

use std::collections::{HashMap, VecDeque};

use crate::identity::NodeId;

/// Redundant rounds per preset broadcast.
pub const SAVE_ROUNDS: usize = 3;

/// Minimum gap between fragments of one round.
pub const FRAGMENT_SPACING_MS: u64 = 20;

/// Gap between redundant rounds.
pub const ROUND_GAP_MS: u64 = 50;

/// Period of the anti-entropy `RequestSyncPresets` broadcast.
pub const SYNC_REQUEST_INTERVAL_MS: u64 = 60_000;

/// Pacing of outgoing `PresetManifest` messages.
pub const MANIFEST_SPACING_MS: u64 = 100;

/// Pacing of outgoing `RequestPresetData` pulls.
pub const PULL_SPACING_MS: u64 = 500;

/// How long a pulled name suppresses duplicate pulls.
pub const REQUEST_TRACK_MS: u64 = 30_000;

/// How long `check_exists` waits for a response.
pub const QUERY_TIMEOUT_MS: u64 = 500;

/// Encoded frames scheduled against deadlines in local monotonic
/// milliseconds. The network tick drains whatever is due.
#[derive(Default)]
pub struct PacingQueue {
    queue: VecDeque<(u64, Vec<u8>)>,
}

impl PacingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the next drain.
    pub fn push_now(&mut self, now_ms: u64, frame: Vec<u8>) {
        self.push_at(now_ms, frame);
    }

    /// Queue a frame for a specific deadline.
    pub fn push_at(&mut self, due_ms: u64, frame: Vec<u8>) {
        // Keep the queue sorted by deadline; inserts are near the tail
        // in practice.
        let at = self
            .queue
            .iter()
            .rposition(|(due, _)| *due <= due_ms)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.queue.insert(at, (due_ms, frame));
    }

    /// Schedule the redundant rounds of a fragmented transfer:
    /// fragments [`FRAGMENT_SPACING_MS`] apart, rounds separated by
    /// [`ROUND_GAP_MS`]. Returns the deadline of the last frame.
    pub fn schedule_rounds(&mut self, now_ms: u64, frames: &[Vec<u8>]) -> u64 {
        if frames.is_empty() {
            return now_ms;
        }
        let round_span = (frames.len() as u64 - 1) * FRAGMENT_SPACING_MS;
        let mut last_due = now_ms;
        for round in 0..SAVE_ROUNDS as u64 {
            let round_start = now_ms + round * (round_span + ROUND_GAP_MS);
            for (i, frame) in frames.iter().enumerate() {
                let due = round_start + i as u64 * FRAGMENT_SPACING_MS;
                self.push_at(due, frame.clone());
                last_due = due;
            }
        }
        last_due
    }

    /// Remove and return every frame whose deadline has passed, in
    /// deadline order.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        while matches!(self.queue.front(), Some((deadline, _)) if *deadline <= now_ms) {
            due.push(self.queue.pop_front().unwrap().1);
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Names recently pulled from a peer; suppresses duplicate pulls while
/// the answering broadcast is still in flight.
#[derive(Default)]
pub struct RequestTracker {
    entries: HashMap<String, u64>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recently_requested(&self, name: &str, now_ms: u64) -> bool {
        self.entries
            .get(name)
            .is_some_and(|&at| now_ms.saturating_sub(at) < REQUEST_TRACK_MS)
    }

    pub fn mark(&mut self, name: &str, now_ms: u64) {
        self.entries.insert(name.to_string(), now_ms);
    }

    /// Drop entries past the suppression window.
    pub fn expire(&mut self, now_ms: u64) {
        self.entries
            .retain(|_, &mut at| now_ms.saturating_sub(at) < REQUEST_TRACK_MS);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Preset names waiting to go out as `PresetManifest` messages, one
/// every [`MANIFEST_SPACING_MS`].
#[derive(Default)]
pub struct ManifestQueue {
    names: VecDeque<String>,
    next_due_ms: u64,
}

impl ManifestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full preset listing. Names already waiting are not
    /// duplicated.
    pub fn schedule(&mut self, names: Vec<String>) {
        for name in names {
            if !self.names.contains(&name) {
                self.names.push_back(name);
            }
        }
    }

    /// Next name to announce, if pacing allows.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<String> {
        if now_ms < self.next_due_ms {
            return None;
        }
        let name = self.names.pop_front()?;
        self.next_due_ms = now_ms + MANIFEST_SPACING_MS;
        Some(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Directed pulls waiting to go out, one every [`PULL_SPACING_MS`].
#[derive(Default)]
pub struct PullQueue {
    requests: VecDeque<(NodeId, String)>,
    next_due_ms: u64,
}

impl PullQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: NodeId, name: String) {
        if !self.requests.iter().any(|(_, n)| *n == name) {
            self.requests.push_back((target, name));
        }
    }

    pub fn pop_due(&mut self, now_ms: u64) -> Option<(NodeId, String)> {
        if now_ms < self.next_due_ms {
            return None;
        }
        let request = self.requests.pop_front()?;
        self.next_due_ms = now_ms + PULL_SPACING_MS;
        Some(request)
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_queue_orders_by_deadline() {
        let mut queue = PacingQueue::new();
        queue.push_at(30, vec![3]);
        queue.push_at(10, vec![1]);
        queue.push_at(20, vec![2]);

        assert!(queue.pop_due(5).is_empty());
        assert_eq!(queue.pop_due(25), vec![vec![1], vec![2]]);
        assert_eq!(queue.pop_due(30), vec![vec![3]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pacing_queue_same_deadline_keeps_insertion_order() {
        let mut queue = PacingQueue::new();
        queue.push_now(0, vec![1]);
        queue.push_now(0, vec![2]);
        queue.push_now(0, vec![3]);
        assert_eq!(queue.pop_due(0), vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_schedule_rounds_timing() {
        let mut queue = PacingQueue::new();
        let frames = vec![vec![0xa], vec![0xb]];
        let last = queue.schedule_rounds(1_000, &frames);

        // Two fragments, three rounds: round span 20, rounds start at
        // 1000, 1070, 1140; last fragment due 1160.
        assert_eq!(queue.len(), 6);
        assert_eq!(last, 1_160);

        assert_eq!(queue.pop_due(1_000).len(), 1);
        assert_eq!(queue.pop_due(1_020).len(), 1);
        assert_eq!(queue.pop_due(1_069).len(), 0);
        assert_eq!(queue.pop_due(1_090).len(), 2);
        assert_eq!(queue.pop_due(2_000).len(), 2);
    }

    #[test]
    fn test_schedule_rounds_single_fragment() {
        let mut queue = PacingQueue::new();
        let last = queue.schedule_rounds(0, &[vec![1]]);
        // Rounds at 0, 50, 100.
        assert_eq!(queue.len(), 3);
        assert_eq!(last, 100);
    }

    #[test]
    fn test_request_tracker_window() {
        let mut tracker = RequestTracker::new();
        assert!(!tracker.recently_requested("A", 0));

        tracker.mark("A", 1_000);
        assert!(tracker.recently_requested("A", 1_000));
        assert!(tracker.recently_requested("A", 30_999));
        assert!(!tracker.recently_requested("A", 31_000));

        tracker.expire(31_000);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_manifest_queue_pacing_and_dedup() {
        let mut queue = ManifestQueue::new();
        queue.schedule(vec!["a".into(), "b".into()]);
        queue.schedule(vec!["b".into(), "c".into()]);

        assert_eq!(queue.pop_due(0), Some("a".into()));
        assert_eq!(queue.pop_due(50), None);
        assert_eq!(queue.pop_due(100), Some("b".into()));
        assert_eq!(queue.pop_due(200), Some("c".into()));
        assert_eq!(queue.pop_due(300), None);
    }

    #[test]
    fn test_pull_queue_pacing_and_dedup() {
        let mut queue = PullQueue::new();
        let peer_a = NodeId::from_raw(1);
        let peer_b = NodeId::from_raw(2);

        queue.push(peer_a, "x".into());
        queue.push(peer_b, "x".into()); // duplicate name, dropped
        queue.push(peer_b, "y".into());

        assert_eq!(queue.pop_due(0), Some((peer_a, "x".into())));
        assert_eq!(queue.pop_due(100), None);
        assert_eq!(queue.pop_due(500), Some((peer_b, "y".into())));
        assert!(queue.is_empty());
    }
}

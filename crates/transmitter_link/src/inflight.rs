//! In-flight command table and inbound duplicate window

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use tokio::time::Instant;

use crate::codec::PacketType;

/// A command awaiting its acknowledgement
#[derive(Debug, Clone)]
pub(crate) struct InflightEntry {
    pub payload: Bytes,
    pub deadline: Instant,
    pub retries: u32,
}

/// Keyed by sequence number
#[derive(Debug, Default)]
pub(crate) struct InflightTable {
    entries: BTreeMap<u16, InflightEntry>,
}

impl InflightTable {
    pub fn insert(&mut self, seq: u16, payload: Bytes, deadline: Instant) {
        self.entries.insert(
            seq,
            InflightEntry {
                payload,
                deadline,
                retries: 0,
            },
        );
    }

    pub fn contains(&self, seq: u16) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn remove(&mut self, seq: u16) -> Option<InflightEntry> {
        self.entries.remove(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    /// Sequences whose deadline has passed
    pub fn expired(&self, now: Instant) -> Vec<u16> {
        self.entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(seq, _)| *seq)
            .collect()
    }

    pub fn get_mut(&mut self, seq: u16) -> Option<&mut InflightEntry> {
        self.entries.get_mut(&seq)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = u16> + '_ {
        std::mem::take(&mut self.entries).into_keys()
    }
}

/// Remembers the last `capacity` inbound `(seq, type)` pairs
#[derive(Debug)]
pub(crate) struct DedupWindow {
    seen: VecDeque<(u16, PacketType)>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// `true` the first time a pair is seen
    pub fn insert(&mut self, seq: u16, kind: PacketType) -> bool {
        if self.seen.contains(&(seq, kind)) {
            return false;
        }
        if self.seen.len() == self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back((seq, kind));
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expired_and_earliest() {
        let now = Instant::now();
        let mut table = InflightTable::default();
        table.insert(1, Bytes::new(), now + Duration::from_secs(2));
        table.insert(2, Bytes::new(), now + Duration::from_secs(1));

        assert_eq!(table.earliest_deadline(), Some(now + Duration::from_secs(1)));
        assert!(table.expired(now).is_empty());
        assert_eq!(table.expired(now + Duration::from_secs(1)), vec![2]);
        assert!(table.remove(2).is_some());
        assert_eq!(table.drain().collect::<Vec<_>>(), vec![1]);
        assert!(table.is_empty());
    }

    #[test]
    fn dedup_window_forgets_oldest() {
        let mut window = DedupWindow::new(2);
        assert!(window.insert(1, PacketType::Command));
        assert!(!window.insert(1, PacketType::Command));
        assert!(window.insert(1, PacketType::Telemetry));
        assert!(window.insert(2, PacketType::Command));
        assert!(window.insert(1, PacketType::Command));
    }
}

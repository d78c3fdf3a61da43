//! Link counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared between the machine and link observers
#[derive(Debug, Default)]
pub struct LinkStats {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub send_errors: AtomicU64,
    pub framing_errors: AtomicU64,
    pub duplicates: AtomicU64,
    pub fragments_sent: AtomicU64,
    pub fragments_abandoned: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub commands_sent: AtomicU64,
    pub command_retries: AtomicU64,
    pub command_timeouts: AtomicU64,
    pub handshakes: AtomicU64,
    pub recoveries: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get snapshot
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStatsSnapshot {
            packets_sent: load(&self.packets_sent),
            packets_received: load(&self.packets_received),
            send_errors: load(&self.send_errors),
            framing_errors: load(&self.framing_errors),
            duplicates: load(&self.duplicates),
            fragments_sent: load(&self.fragments_sent),
            fragments_abandoned: load(&self.fragments_abandoned),
            frames_skipped: load(&self.frames_skipped),
            commands_sent: load(&self.commands_sent),
            command_retries: load(&self.command_retries),
            command_timeouts: load(&self.command_timeouts),
            handshakes: load(&self.handshakes),
            recoveries: load(&self.recoveries),
        }
    }
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub send_errors: u64,
    pub framing_errors: u64,
    pub duplicates: u64,
    pub fragments_sent: u64,
    pub fragments_abandoned: u64,
    pub frames_skipped: u64,
    pub commands_sent: u64,
    pub command_retries: u64,
    pub command_timeouts: u64,
    pub handshakes: u64,
    pub recoveries: u64,
}

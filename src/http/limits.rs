//! Per-peer connection limits.

use std::net::IpAddr;
use std::sync::Arc;
use dashmap::DashMap;

/// Counts live connections per peer IP and refuses slots beyond `max_per_peer`.
#[derive(Debug)]
pub struct PeerLimiter {
    counts: Arc<DashMap<IpAddr, usize>>,
    max_per_peer: usize,
}

impl PeerLimiter {
    pub fn new(max_per_peer: usize) -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
            max_per_peer,
        }
    }

    /// Reserve a slot for `ip`, or `None` if the peer is at its limit.
    pub fn try_acquire(&self, ip: IpAddr) -> Option<PeerSlot> {
        let mut count = self.counts.entry(ip).or_insert(0);
        if *count >= self.max_per_peer {
            return None;
        }
        *count += 1;

        Some(PeerSlot {
            counts: Arc::clone(&self.counts),
            ip,
        })
    }

    /// Live connections currently held by `ip`.
    pub fn connections(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).map(|c| *c).unwrap_or(0)
    }

    pub fn max_per_peer(&self) -> usize {
        self.max_per_peer
    }
}

/// A reserved per-peer slot, released on drop.
#[derive(Debug)]
pub struct PeerSlot {
    counts: Arc<DashMap<IpAddr, usize>>,
    ip: IpAddr,
}

impl Drop for PeerSlot {
    fn drop(&mut self) {
        if let Some(mut count) = self.counts.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
        }
        self.counts.remove_if(&self.ip, |_, count| *count == 0);
    }
}

//! Load-coalescing discipline: at most one concurrent computation per
//! fingerprint.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
pub struct SingleFlight {
    in_flight: DashMap<String, Arc<Notify>>,
}

pub enum Lease {
    /// This caller is the leader: it must compute the value and call `finish`.
    Leader(String),
    /// Another caller is already computing; await the notify, then re-probe L1.
    Follower(Arc<Notify>),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to become the leader for `key`. Returns `Follower` if someone
    /// else already holds the lease.
    pub fn acquire(&self, key: &str) -> Lease {
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Lease::Follower(existing.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Notify::new()));
                Lease::Leader(key.to_string())
            }
        }
    }

    /// Releases the lease and wakes every follower waiting on it.
    pub fn finish(&self, key: &str) {
        if let Some((_, notify)) = self.in_flight.remove(key) {
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_caller_leads_second_follows() {
        let sf = SingleFlight::new();
        assert!(matches!(sf.acquire("k"), Lease::Leader(_)));
        assert!(matches!(sf.acquire("k"), Lease::Follower(_)));
    }

    #[test]
    fn finish_releases_the_lease_for_reacquisition() {
        let sf = SingleFlight::new();
        let _ = sf.acquire("k");
        sf.finish("k");
        assert!(matches!(sf.acquire("k"), Lease::Leader(_)));
    }
}

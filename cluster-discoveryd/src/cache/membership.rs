use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;
use shared::types::{MembershipChange, ServiceEntry};
use crate::sink::MembershipSink;

/// Last observation of a live member
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub entry: ServiceEntry,
    pub last_seen: Instant,
}

/// Live membership keyed by peer address.
///
/// Every insertion is reported as exactly one "added" and every removal as
/// exactly one "removed". The sink is notified while the lock is held so
/// transitions for one address reach it in order. Ages are measured on the
/// monotonic clock, so wall-clock steps never expire a live member.
pub struct MembershipCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    sink: Arc<dyn MembershipSink>,
}

impl MembershipCache {
    pub fn new(sink: Arc<dyn MembershipSink>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Apply a resolved observation. Returns the transition it caused, if any.
    pub fn observe(&self, entry: ServiceEntry) -> Option<MembershipChange> {
        self.observe_at(entry, Instant::now())
    }

    pub fn observe_at(&self, entry: ServiceEntry, now: Instant) -> Option<MembershipChange> {
        let address = entry.address()?.to_string();
        let mut entries = self.entries.lock();

        if entry.is_goodbye() {
            entries.remove(&address)?;
            self.sink.remove_member(&address);
            return Some(MembershipChange::removed(address));
        }

        match entries.get_mut(&address) {
            Some(cached) => {
                cached.entry = entry;
                cached.last_seen = now;
                None
            }
            None => {
                tracing::debug!("Caching {} ({})", entry.instance_name(), address);
                entries.insert(address.clone(), CacheEntry { entry, last_seen: now });
                self.sink.new_member(&address);
                Some(MembershipChange::added(address))
            }
        }
    }

    /// Remove every member not seen within `timeout`. Returns the removed addresses.
    pub fn sweep(&self, timeout: Duration) -> Vec<String> {
        self.sweep_at(Instant::now(), timeout)
    }

    pub fn sweep_at(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, cached)| now.saturating_duration_since(cached.last_seen) > timeout)
            .map(|(address, _)| address.clone())
            .collect();

        for address in &expired {
            entries.remove(address);
            tracing::info!("Member {} timed out without goodbye", address);
            self.sink.remove_member(address);
        }

        expired
    }

    #[cfg(test)]
    pub fn get(&self, address: &str) -> Option<CacheEntry> {
        self.entries.lock().get(address).cloned()
    }

    /// Addresses of all live members, sorted
    pub fn members(&self) -> Vec<String> {
        let mut members: Vec<String> = self.entries.lock().keys().cloned().collect();
        members.sort();
        members
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

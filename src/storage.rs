//! Short-lived store of binding requests keyed by the transport address they came from
//!
//! The responder writes one entry per request; the correlator pops it when a
//! server-reflexive candidate with the same address shows up. Entries that are
//! never claimed are collected once they are older than the configured TTL.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stun::Message;

/// How long an unclaimed request stays visible
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(60);

/// How often expired entries are collected
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(2);

/// Shortest period the collector task accepts
pub const MIN_COLLECT_INTERVAL: Duration = Duration::from_millis(1);

/// `ip:port` key shared by the UDP side and the SDP side
///
/// IPv6 addresses use the canonical RFC 5952 text form without brackets or
/// zone, and IPv4-mapped IPv6 addresses collapse to plain IPv4, so a request
/// received on a dual-stack socket matches the candidate the browser reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };
        Self(format!("{}:{}", ip, port))
    }

    /// Key for a candidate whose connection address is a hostname (e.g. mDNS `.local`)
    pub fn from_host(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host.to_ascii_lowercase(), port))
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for CorrelationKey {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct StorageEntry {
    message: Message,
    created_at: Instant,
}

impl StorageEntry {
    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Store counters
#[derive(Debug, Default)]
pub struct StoreStats {
    pub added: AtomicU64,
    pub replaced: AtomicU64,
    pub popped: AtomicU64,
    pub missed: AtomicU64,
    pub collected: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatsSnapshot {
    pub added: u64,
    pub replaced: u64,
    pub popped: u64,
    pub missed: u64,
    pub collected: u64,
}

impl StoreStats {
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
        }
    }
}

/// Address-keyed cache of recent binding requests
pub struct CorrelationStore {
    entries: Mutex<HashMap<CorrelationKey, StorageEntry>>,
    ttl: Duration,
    stats: StoreStats,
}

impl CorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            stats: StoreStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Store a copy of `message`, replacing any earlier entry for `key`
    pub fn add(&self, key: CorrelationKey, message: &Message) {
        self.insert_at(key, message.clone(), Instant::now());
    }

    /// [`add`](Self::add) with an explicit creation time
    pub fn add_at(&self, key: CorrelationKey, message: &Message, now: Instant) {
        self.insert_at(key, message.clone(), now);
    }

    fn insert_at(&self, key: CorrelationKey, message: Message, created_at: Instant) {
        let entry = StorageEntry { message, created_at };

        let previous = self.entries.lock().insert(key.clone(), entry);

        self.stats.added.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.stats.replaced.fetch_add(1, Ordering::Relaxed);
        }
        debug!("storage: added {}", key);
    }

    /// Remove and return the entry for `key` if it is still fresh
    pub fn pop(&self, key: &CorrelationKey) -> Option<Message> {
        self.pop_at(key, Instant::now())
    }

    /// [`pop`](Self::pop) evaluated at `now`
    pub fn pop_at(&self, key: &CorrelationKey, now: Instant) -> Option<Message> {
        let removed = self.entries.lock().remove(key);

        match removed {
            Some(entry) if !entry.expired(now, self.ttl) => {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                Some(entry.message)
            }
            Some(_) => {
                self.stats.collected.fetch_add(1, Ordering::Relaxed);
                self.stats.missed.fetch_add(1, Ordering::Relaxed);
                debug!("storage: {} expired before it was claimed", key);
                None
            }
            None => {
                self.stats.missed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop every entry older than the TTL; returns how many were removed
    pub fn collect(&self) -> usize {
        self.collect_at(Instant::now())
    }

    /// [`collect`](Self::collect) evaluated at `now`
    pub fn collect_at(&self, now: Instant) -> usize {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| !entry.expired(now, self.ttl));
            before - entries.len()
        };

        if removed > 0 {
            self.stats.collected.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("storage: collected {}", removed);
        }
        removed
    }

    /// Run [`collect`](Self::collect) every `period` until `token` is cancelled
    ///
    /// A period below [`MIN_COLLECT_INTERVAL`] is raised to it.
    pub fn spawn_collector(self: &Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        if period < MIN_COLLECT_INTERVAL {
            warn!("storage: collect interval {:?} too short, using {:?}", period, MIN_COLLECT_INTERVAL);
        }
        let period = period.max(MIN_COLLECT_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("storage: collector started (ttl {:?}, every {:?})", store.ttl, period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        store.collect();
                    }
                }
            }

            info!("storage: collector stopped");
        })
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_TTL)
    }
}

use super::mem::AccessKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Debug,
    strum::EnumIter,
    strum::Display,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum RequestStatus {
    HIT = 0,
    MISS,
    /// merged into an in-flight access to the same block
    COALESCED,
    /// dropped prefetch
    ABORTED,
}

#[derive(
    Debug,
    strum::EnumIter,
    strum::Display,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum RetryReason {
    /// entry lock was held and the request was non-blocking
    LOCK_BUSY = 0,
    /// a request further down the hierarchy failed
    DOWNSTREAM_ERROR,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latency {
    pub count: u64,
    pub total: u64,
    pub max: u64,
}

impl Latency {
    pub fn add(&mut self, cycles: u64) {
        self.count += 1;
        self.total += cycles;
        self.max = self.max.max(cycles);
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total as f64 / self.count as f64
    }
}

pub type CacheCsvRow = ((AccessKind, RequestStatus), usize);

/// Per module counters.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    pub accesses: HashMap<(AccessKind, RequestStatus), usize>,
    pub retries: HashMap<(AccessKind, RetryReason), usize>,
    pub latency: HashMap<AccessKind, Latency>,
    /// request messages this module put on a network
    pub messages: HashMap<AccessKind, usize>,
    pub evictions: usize,
    pub dirty_evictions: usize,
    pub useful_prefetches: usize,
    pub port_waits: usize,
    pub lock_waits: usize,
}

impl Cache {
    #[must_use]
    pub fn count(&self, kind: AccessKind, status: RequestStatus) -> usize {
        self.accesses.get(&(kind, status)).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn num_retries(&self, kind: AccessKind) -> usize {
        self.retries
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, count)| count)
            .sum()
    }

    #[must_use]
    pub fn num_messages(&self, kind: AccessKind) -> usize {
        self.messages.get(&kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn flatten(&self) -> Vec<CacheCsvRow> {
        let mut flattened: Vec<_> = self.accesses.clone().into_iter().collect();
        flattened.sort_by_key(|(access, _)| *access);
        flattened
    }
}

impl std::ops::AddAssign for Cache {
    fn add_assign(&mut self, other: Self) {
        for (k, v) in other.accesses {
            *self.accesses.entry(k).or_insert(0) += v;
        }
        for (k, v) in other.retries {
            *self.retries.entry(k).or_insert(0) += v;
        }
        for (k, v) in other.messages {
            *self.messages.entry(k).or_insert(0) += v;
        }
        for (k, v) in other.latency {
            let latency = self.latency.entry(k).or_default();
            latency.count += v.count;
            latency.total += v.total;
            latency.max = latency.max.max(v.max);
        }
        self.evictions += other.evictions;
        self.dirty_evictions += other.dirty_evictions;
        self.useful_prefetches += other.useful_prefetches;
        self.port_waits += other.port_waits;
        self.lock_waits += other.lock_waits;
    }
}

/// Counters of every module, keyed by module name in hierarchy order.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerCache(pub IndexMap<String, Cache>);

impl std::ops::Deref for PerCache {
    type Target = IndexMap<String, Cache>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for PerCache {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl PerCache {
    #[must_use]
    pub fn reduce(&self) -> Cache {
        let mut out = Cache::default();
        for stats in self.0.values() {
            out += stats.clone();
        }
        out
    }
}

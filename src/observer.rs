use crate::address;
use stats::{AccessKind, RequestStatus, RetryReason, Stats};

/// Hooks called at the lifecycle points of an access.
///
/// All hooks default to doing nothing.
#[allow(unused_variables)]
pub trait Observer: std::fmt::Debug {
    fn access_start(&mut self, module: &str, kind: AccessKind, addr: address, cycle: u64) {}

    fn coalesced(&mut self, module: &str, kind: AccessKind) {}

    fn port_wait(&mut self, module: &str) {}

    fn lock_wait(&mut self, module: &str) {}

    fn retry(&mut self, module: &str, kind: AccessKind, reason: RetryReason) {}

    /// `request` is false for replies.
    fn message_sent(
        &mut self,
        network: &str,
        module: &str,
        kind: AccessKind,
        size: u32,
        request: bool,
    ) {
    }

    fn message_rejected(&mut self, network: &str) {}

    fn eviction(&mut self, module: &str, dirty: bool) {}

    fn useful_prefetch(&mut self, module: &str) {}

    fn access_finish(
        &mut self,
        module: &str,
        kind: AccessKind,
        status: RequestStatus,
        latency: u64,
    ) {
    }
}

/// Fills [`Stats`].
#[derive(Debug, Default)]
pub struct StatsCollector {
    pub stats: Stats,
}

impl StatsCollector {
    #[must_use]
    pub fn new<M, N>(modules: M, networks: N) -> Self
    where
        M: IntoIterator,
        M::Item: ToString,
        N: IntoIterator,
        N::Item: ToString,
    {
        Self {
            stats: Stats::new(modules, networks),
        }
    }

    fn cache(&mut self, module: &str) -> &mut stats::Cache {
        self.stats.caches.entry(module.to_string()).or_default()
    }
}

impl Observer for StatsCollector {
    fn coalesced(&mut self, module: &str, kind: AccessKind) {
        log::trace!("{module}: {kind} coalesced");
    }

    fn port_wait(&mut self, module: &str) {
        self.cache(module).port_waits += 1;
    }

    fn lock_wait(&mut self, module: &str) {
        self.cache(module).lock_waits += 1;
    }

    fn retry(&mut self, module: &str, kind: AccessKind, reason: RetryReason) {
        *self.cache(module).retries.entry((kind, reason)).or_insert(0) += 1;
    }

    fn message_sent(
        &mut self,
        network: &str,
        module: &str,
        kind: AccessKind,
        size: u32,
        request: bool,
    ) {
        let net = self.stats.networks.entry(network.to_string()).or_default();
        net.messages += 1;
        net.bytes += u64::from(size);
        if request {
            *self.cache(module).messages.entry(kind).or_insert(0) += 1;
        }
    }

    fn message_rejected(&mut self, network: &str) {
        self.stats
            .networks
            .entry(network.to_string())
            .or_default()
            .rejected += 1;
    }

    fn eviction(&mut self, module: &str, dirty: bool) {
        let cache = self.cache(module);
        cache.evictions += 1;
        if dirty {
            cache.dirty_evictions += 1;
        }
    }

    fn useful_prefetch(&mut self, module: &str) {
        self.cache(module).useful_prefetches += 1;
    }

    fn access_finish(
        &mut self,
        module: &str,
        kind: AccessKind,
        status: RequestStatus,
        latency: u64,
    ) {
        self.stats.sim.accesses += 1;
        let cache = self.cache(module);
        *cache.accesses.entry((kind, status)).or_insert(0) += 1;
        cache.latency.entry(kind).or_default().add(latency);
    }
}

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod stress;

use crate::config::{self, Config, ModuleKind, Policy, Range, ReplacementPolicy, VictimBias};

static LOGGER: std::sync::Once = std::sync::Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

pub const BLOCK_SIZE: u32 = 64;

#[must_use]
pub fn network(name: &str, latency: u64) -> config::Network {
    config::Network {
        name: name.to_string(),
        buffer_size: 1024,
        latency,
        bandwidth: 32,
    }
}

#[must_use]
pub fn cache(
    name: &str,
    num_sets: usize,
    associativity: usize,
    latency: u64,
    low_network: Option<&str>,
    high_network: Option<&str>,
) -> config::Module {
    config::Module {
        name: name.to_string(),
        kind: ModuleKind::Cache,
        num_sets,
        associativity,
        block_size: BLOCK_SIZE,
        latency,
        num_ports: 2,
        mshr_size: 0,
        replacement_policy: ReplacementPolicy::LRU,
        victim_bias: None,
        range: Range::All,
        low_network: low_network.map(str::to_string),
        high_network: high_network.map(str::to_string),
    }
}

#[must_use]
pub fn main_memory(name: &str, high_network: &str) -> config::Module {
    config::Module {
        kind: ModuleKind::MainMemory,
        ..cache(name, 256, 16, 20, None, Some(high_network))
    }
}

/// Two private first level caches sharing a second level cache in front of
/// main memory.
///
/// Modules are `l1-0`, `l1-1`, `l2` and `mm`, in this order.
#[must_use]
pub fn two_level(policy: Policy) -> Config {
    Config {
        policy,
        peer_transfers: false,
        check_coherence: true,
        seed: 42,
        max_stall_cycles: 100_000,
        networks: vec![network("l1-l2", 2), network("l2-mm", 4)],
        modules: vec![
            cache("l1-0", 4, 2, 1, Some("l1-l2"), None),
            cache("l1-1", 4, 2, 1, Some("l1-l2"), None),
            cache("l2", 16, 4, 4, Some("l2-mm"), Some("l1-l2")),
            main_memory("mm", "l2-mm"),
        ],
    }
}

/// Four first level caches, two per second level cache, over a shared third
/// level cache in front of main memory.
///
/// Every cache has a single port and first level caches take at most two
/// accesses at a time. The networks below the second level only buffer one
/// data message and a header per destination.
#[must_use]
pub fn three_level(policy: Policy) -> Config {
    let l1 = |name: &str, network: &str| config::Module {
        mshr_size: 2,
        num_ports: 1,
        ..cache(name, 2, 2, 1, Some(network), None)
    };
    let l2 = |name: &str, high_network: &str| config::Module {
        num_ports: 1,
        replacement_policy: ReplacementPolicy::FIFO,
        victim_bias: Some(VictimBias::SHARED_FIRST),
        ..cache(name, 2, 2, 2, Some("l2-l3"), Some(high_network))
    };
    let small_buffer = |name: &str, latency: u64| config::Network {
        buffer_size: BLOCK_SIZE + 16,
        ..network(name, latency)
    };
    Config {
        policy,
        peer_transfers: false,
        check_coherence: true,
        seed: 7,
        max_stall_cycles: 20_000,
        networks: vec![
            network("l1-l2-0", 1),
            network("l1-l2-1", 1),
            small_buffer("l2-l3", 2),
            small_buffer("l3-mm", 4),
        ],
        modules: vec![
            l1("l1-0", "l1-l2-0"),
            l1("l1-1", "l1-l2-0"),
            l1("l1-2", "l1-l2-1"),
            l1("l1-3", "l1-l2-1"),
            l2("l2-0", "l1-l2-0"),
            l2("l2-1", "l1-l2-1"),
            config::Module {
                num_ports: 1,
                replacement_policy: ReplacementPolicy::RANDOM,
                ..cache("l3", 4, 2, 4, Some("l3-mm"), Some("l2-l3"))
            },
            main_memory("mm", "l3-mm"),
        ],
    }
}

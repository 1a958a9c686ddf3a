use crate::{
    access::AccessId,
    config::{Config, Policy},
    error::Error,
    sim::Simulator,
    testing,
    trace::{self, Command, Trace},
    RequestStatus,
};
use color_eyre::eyre;
use rand::{rngs::StdRng, Rng, SeedableRng};
use stats::AccessKind;

const CLIENTS: [&str; 3] = ["l1-0", "l1-1", "l1-2"];
const THREE_LEVEL_CLIENTS: [&str; 4] = ["l1-0", "l1-1", "l1-2", "l1-3"];

/// Three small first level caches in front of a second level cache that is
/// too small to hold all of their blocks.
fn small_hierarchy(policy: Policy, peer_transfers: bool) -> Config {
    let mut config = testing::two_level(policy);
    config.peer_transfers = peer_transfers;
    config.modules = vec![
        testing::cache("l1-0", 2, 2, 1, Some("l1-l2"), None),
        testing::cache("l1-1", 2, 2, 1, Some("l1-l2"), None),
        testing::cache("l1-2", 2, 2, 1, Some("l1-l2"), None),
        testing::cache("l2", 4, 2, 4, Some("l2-mm"), Some("l1-l2")),
        testing::main_memory("mm", "l2-mm"),
    ];
    config
}

fn random_trace(
    clients: &[&str],
    seed: u64,
    len: usize,
    num_blocks: u64,
    nc_stores: bool,
) -> Trace {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cycle = 0;
    let commands = (0..len)
        .map(|_| {
            cycle += rng.gen_range(0..8);
            let kind = match rng.gen_range(0..100) {
                0..=49 => AccessKind::LOAD,
                50..=79 => AccessKind::STORE,
                80..=89 if nc_stores => AccessKind::NC_STORE,
                _ => AccessKind::PREFETCH,
            };
            let block = rng.gen_range(0..num_blocks);
            let offset = rng.gen_range(0..u64::from(testing::BLOCK_SIZE));
            Command {
                cycle,
                module: clients[rng.gen_range(0..clients.len())].to_string(),
                kind,
                addr: block * u64::from(testing::BLOCK_SIZE) + offset,
            }
        })
        .collect();
    Trace { commands }
}

fn run_random(config: Config, trace: &Trace) -> eyre::Result<()> {
    let mut sim = Simulator::new(config)?;
    let ids = trace::run(&mut sim, trace)?;
    check_random(&sim, trace, &ids, "l2")
}

fn check_random(
    sim: &Simulator,
    trace: &Trace,
    ids: &[AccessId],
    last_level: &str,
) -> eyre::Result<()> {
    let label = format!("{:?} peer={}", sim.config.policy, sim.config.peer_transfers);
    assert_eq!(ids.len(), trace.len());
    assert_eq!(sim.num_pending(), 0);

    for (id, command) in ids.iter().zip(trace.commands.iter()) {
        let outcome = sim
            .outcome(*id)
            .ok_or_else(|| eyre::eyre!("{label}: access {id} did not finish"))?;
        assert_eq!(outcome.kind, command.kind);
        if command.kind != AccessKind::PREFETCH {
            assert_ne!(outcome.status, RequestStatus::ABORTED, "{label}: {command:?}");
        }
    }

    let stats = sim.stats();
    assert_eq!(stats.sim.accesses, trace.len() as u64);
    let evictions = stats.caches[last_level].evictions;
    assert!(evictions > 0, "{label}: {last_level} never evicted");
    sim.check_all()?;
    Ok(())
}

#[test]
fn test_random_contention() -> eyre::Result<()> {
    testing::init_logging();
    let trace = random_trace(&CLIENTS, 7, 400, 24, false);
    for policy in [Policy::Snoop, Policy::Directory] {
        run_random(small_hierarchy(policy, false), &trace)?;
    }
    run_random(small_hierarchy(Policy::Directory, true), &trace)?;
    Ok(())
}

#[test]
fn test_random_contention_with_nc_stores() -> eyre::Result<()> {
    testing::init_logging();
    for seed in 0..4 {
        let trace = random_trace(&CLIENTS, seed, 250, 16, true);
        for policy in [Policy::Snoop, Policy::Directory] {
            run_random(small_hierarchy(policy, false), &trace)?;
        }
        run_random(small_hierarchy(Policy::Directory, true), &trace)?;
    }
    Ok(())
}

#[test]
fn test_same_block_hammering() -> eyre::Result<()> {
    testing::init_logging();
    let commands = (0..60)
        .map(|i| Command {
            cycle: i / 3,
            module: CLIENTS[(i % 3) as usize].to_string(),
            kind: if i % 2 == 0 {
                AccessKind::STORE
            } else {
                AccessKind::LOAD
            },
            addr: 0x80 + (i % 8) * 4,
        })
        .collect();
    let trace = Trace { commands };
    for policy in [Policy::Snoop, Policy::Directory] {
        let mut sim = Simulator::new(small_hierarchy(policy, false))?;
        let ids = trace::run(&mut sim, &trace)?;
        assert!(ids.iter().all(|id| sim.outcome(*id).is_some()));
        sim.check_all()?;
        let retries: usize = sim
            .stats()
            .caches
            .values()
            .map(|cache| cache.retries.values().sum::<usize>())
            .sum();
        assert!(retries > 0, "{policy:?}");
    }
    Ok(())
}

#[test]
fn test_random_three_level() -> eyre::Result<()> {
    testing::init_logging();
    let mut completed = 0;
    let mut stalled = 0;
    let mut rejected = 0;
    for seed in 0..6 {
        let trace = random_trace(&THREE_LEVEL_CLIENTS, seed, 150, 24, seed % 2 == 1);
        for policy in [Policy::Snoop, Policy::Directory] {
            let mut sim = Simulator::new(testing::three_level(policy))?;
            match trace::run(&mut sim, &trace) {
                Ok(ids) => {
                    check_random(&sim, &trace, &ids, "l3")?;
                    rejected += sim.stats().networks.values().map(|net| net.rejected).sum::<u64>();
                    completed += 1;
                }
                // a down-up request can wait on an entry whose holder waits
                // for a lower level eviction of the very same entry
                Err(Error::Stalled { pending, .. }) => {
                    log::warn!("seed {seed} {policy:?}: {pending} accesses stalled");
                    assert!(pending > 0);
                    stalled += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    assert!(stalled <= 2, "{stalled} of 12 runs stalled");
    assert!(completed >= 10);
    assert!(rejected > 0, "small buffers never filled up");
    Ok(())
}

#[test]
fn test_three_level_hammering_single_port() -> eyre::Result<()> {
    testing::init_logging();
    let commands = (0..48)
        .map(|i: u64| Command {
            cycle: i / 4,
            module: THREE_LEVEL_CLIENTS[(i % 4) as usize].to_string(),
            kind: if i % 3 == 0 {
                AccessKind::STORE
            } else {
                AccessKind::LOAD
            },
            addr: 0x200 + (i % 2) * 0x40,
        })
        .collect();
    let trace = Trace { commands };
    let mut sim = Simulator::new(testing::three_level(Policy::Directory))?;
    let ids = trace::run(&mut sim, &trace)?;
    assert!(ids.iter().all(|id| sim.outcome(*id).is_some()));
    sim.check_all()?;

    let stats = sim.stats();
    let port_waits: usize = stats.caches.values().map(|cache| cache.port_waits).sum();
    assert!(port_waits > 0);
    Ok(())
}

use crate::{
    config::{Config, Policy, Range},
    sim::{Outcome, Simulator},
    testing, RequestStatus, State,
};
use color_eyre::eyre;
use pretty_assertions_sorted as diff;
use stats::AccessKind;

const POLICIES: [Policy; 2] = [Policy::Snoop, Policy::Directory];

fn access(sim: &mut Simulator, module: &str, kind: AccessKind, addr: u64) -> eyre::Result<Outcome> {
    let module = sim.module_id(module)?;
    let id = sim.access(module, kind, addr)?;
    sim.run()?;
    let outcome = sim
        .outcome(id)
        .cloned()
        .ok_or_else(|| eyre::eyre!("access {id} did not finish"))?;
    Ok(outcome)
}

fn state(sim: &Simulator, module: &str, addr: u64) -> eyre::Result<State> {
    Ok(sim.state(sim.module_id(module)?, addr))
}

#[test]
fn test_cold_load_is_exclusive() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        let load = access(&mut sim, "l1-0", AccessKind::LOAD, 0x1000)?;
        assert_eq!(load.status, RequestStatus::MISS);
        assert!(!load.hit);
        assert_eq!(load.state, State::EXCLUSIVE);

        assert_eq!(state(&sim, "l1-0", 0x1000)?, State::EXCLUSIVE);
        assert_eq!(state(&sim, "l2", 0x1000)?, State::EXCLUSIVE);
        assert_eq!(state(&sim, "mm", 0x1000)?, State::EXCLUSIVE);
        assert_eq!(state(&sim, "l1-1", 0x1000)?, State::INVALID);

        let stats = sim.stats();
        diff::assert_eq!(stats.caches["l1-0"].num_messages(AccessKind::READ_REQUEST), 1);
        diff::assert_eq!(stats.caches["l2"].num_messages(AccessKind::READ_REQUEST), 1);
        diff::assert_eq!(stats.caches["l1-0"].count(AccessKind::LOAD, RequestStatus::MISS), 1);
        sim.check_all()?;

        // the block is now present
        let again = access(&mut sim, "l1-0", AccessKind::LOAD, 0x1010)?;
        assert_eq!(again.status, RequestStatus::HIT);
        assert_eq!(again.state, State::EXCLUSIVE);
        assert!(again.latency() < load.latency());
    }
    Ok(())
}

#[test]
fn test_store_after_exclusive_load_stays_local() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        access(&mut sim, "l1-0", AccessKind::LOAD, 0x2000)?;
        let store = access(&mut sim, "l1-0", AccessKind::STORE, 0x2000)?;
        assert_eq!(store.status, RequestStatus::HIT);
        assert_eq!(store.state, State::MODIFIED);

        let stats = sim.stats();
        diff::assert_eq!(stats.caches["l1-0"].num_messages(AccessKind::WRITE_REQUEST), 0);
        assert_eq!(state(&sim, "l2", 0x2000)?, State::EXCLUSIVE);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_read_of_modified_block_keeps_owner() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        access(&mut sim, "l1-0", AccessKind::LOAD, 0x3000)?;
        access(&mut sim, "l1-0", AccessKind::STORE, 0x3000)?;
        let load = access(&mut sim, "l1-1", AccessKind::LOAD, 0x3000)?;
        assert_eq!(load.status, RequestStatus::MISS);
        assert_eq!(load.state, State::SHARED);

        assert_eq!(state(&sim, "l1-0", 0x3000)?, State::OWNED);
        assert_eq!(state(&sim, "l1-1", 0x3000)?, State::SHARED);
        assert_eq!(state(&sim, "l2", 0x3000)?, State::OWNED);
        sim.check_all()?;

        // a store from the sharer takes the block away from the owner
        let store = access(&mut sim, "l1-1", AccessKind::STORE, 0x3000)?;
        assert_eq!(store.state, State::MODIFIED);
        assert_eq!(state(&sim, "l1-0", 0x3000)?, State::INVALID);
        assert_eq!(state(&sim, "l2", 0x3000)?, State::MODIFIED);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_third_reader_sees_sharers() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut config = testing::two_level(policy);
        config
            .modules
            .insert(2, testing::cache("l1-2", 4, 2, 1, Some("l1-l2"), None));
        let mut sim = Simulator::new(config)?;
        access(&mut sim, "l1-0", AccessKind::LOAD, 0x3400)?;
        access(&mut sim, "l1-1", AccessKind::LOAD, 0x3400)?;
        let third = access(&mut sim, "l1-2", AccessKind::LOAD, 0x3400)?;
        assert_eq!(third.state, State::SHARED, "{policy:?}");
        assert_eq!(state(&sim, "l1-0", 0x3400)?, State::SHARED);
        assert_eq!(state(&sim, "l1-1", 0x3400)?, State::SHARED);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_peer_transfer_from_owner() -> eyre::Result<()> {
    testing::init_logging();
    let config = Config {
        peer_transfers: true,
        ..testing::two_level(Policy::Directory)
    };
    let mut sim = Simulator::new(config)?;
    access(&mut sim, "l1-0", AccessKind::LOAD, 0x3800)?;
    access(&mut sim, "l1-0", AccessKind::STORE, 0x3800)?;
    let load = access(&mut sim, "l1-1", AccessKind::LOAD, 0x3800)?;
    assert_eq!(load.state, State::SHARED);
    assert_eq!(state(&sim, "l1-0", 0x3800)?, State::OWNED);
    assert_eq!(state(&sim, "l2", 0x3800)?, State::OWNED);

    let stats = sim.stats();
    diff::assert_eq!(stats.caches["l1-0"].num_messages(AccessKind::PEER), 1);
    sim.check_all()?;
    Ok(())
}

#[test]
fn test_concurrent_loads_coalesce() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        let l1 = sim.module_id("l1-0")?;
        let first = sim.access(l1, AccessKind::LOAD, 0x100)?;
        let second = sim.access(l1, AccessKind::LOAD, 0x108)?;
        sim.run()?;

        let first = sim.outcome(first).cloned().ok_or_else(|| eyre::eyre!("no outcome"))?;
        let second = sim.outcome(second).cloned().ok_or_else(|| eyre::eyre!("no outcome"))?;
        assert_eq!(first.status, RequestStatus::MISS);
        assert_eq!(second.status, RequestStatus::COALESCED);
        assert_eq!(second.state, State::EXCLUSIVE);
        assert!(second.finish_cycle >= first.finish_cycle);

        let stats = sim.stats();
        diff::assert_eq!(stats.caches["l1-0"].num_messages(AccessKind::READ_REQUEST), 1);
        diff::assert_eq!(stats.caches["l1-0"].count(AccessKind::LOAD, RequestStatus::COALESCED), 1);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_dirty_eviction_writes_back() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut config = testing::two_level(policy);
        config.modules[0] = testing::cache("l1-0", 1, 1, 1, Some("l1-l2"), None);
        let mut sim = Simulator::new(config)?;

        access(&mut sim, "l1-0", AccessKind::LOAD, 0x0)?;
        access(&mut sim, "l1-0", AccessKind::STORE, 0x0)?;
        let other = access(&mut sim, "l1-0", AccessKind::LOAD, 0x40)?;
        assert_eq!(other.state, State::EXCLUSIVE);

        assert_eq!(state(&sim, "l1-0", 0x0)?, State::INVALID);
        assert_eq!(state(&sim, "l2", 0x0)?, State::MODIFIED);

        let stats = sim.stats();
        let l1 = &stats.caches["l1-0"];
        diff::assert_eq!(l1.evictions, 1);
        diff::assert_eq!(l1.dirty_evictions, 1);
        diff::assert_eq!(l1.num_messages(AccessKind::EVICT), 1);
        diff::assert_eq!(l1.num_messages(AccessKind::WRITE_REQUEST), 0);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_clean_eviction_keeps_lower_state() -> eyre::Result<()> {
    testing::init_logging();
    let mut config = testing::two_level(Policy::Directory);
    config.modules[0] = testing::cache("l1-0", 1, 1, 1, Some("l1-l2"), None);
    let mut sim = Simulator::new(config)?;

    access(&mut sim, "l1-0", AccessKind::LOAD, 0x0)?;
    access(&mut sim, "l1-0", AccessKind::LOAD, 0x40)?;
    assert_eq!(state(&sim, "l1-0", 0x0)?, State::INVALID);
    assert_eq!(state(&sim, "l2", 0x0)?, State::EXCLUSIVE);

    let l2 = sim.module_id("l2")?;
    let l2 = &sim.hierarchy().modules[l2];
    let (set, way) = l2
        .cache
        .find_valid(0x0)
        .ok_or_else(|| eyre::eyre!("block missing in l2"))?;
    assert_eq!(l2.directory.entry(set, way).num_sharers(), 0);

    let stats = sim.stats();
    diff::assert_eq!(stats.caches["l1-0"].evictions, 1);
    diff::assert_eq!(stats.caches["l1-0"].dirty_evictions, 0);
    Ok(())
}

#[test]
fn test_concurrent_stores_retry() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        let l1_0 = sim.module_id("l1-0")?;
        let l1_1 = sim.module_id("l1-1")?;
        let first = sim.access(l1_0, AccessKind::STORE, 0x4000)?;
        let second = sim.access(l1_1, AccessKind::STORE, 0x4000)?;
        sim.run()?;

        assert!(sim.outcome(first).is_some());
        let second = sim.outcome(second).cloned().ok_or_else(|| eyre::eyre!("no outcome"))?;
        assert!(second.retries >= 1);
        assert_eq!(second.state, State::MODIFIED);

        assert_eq!(sim.state(l1_0, 0x4000), State::INVALID);
        assert_eq!(sim.state(l1_1, 0x4000), State::MODIFIED);
        assert_eq!(state(&sim, "l2", 0x4000)?, State::MODIFIED);

        let stats = sim.stats();
        assert!(stats.caches["l1-1"].num_retries(AccessKind::STORE) >= 1);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_nc_store_from_exclusive() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        access(&mut sim, "l1-0", AccessKind::LOAD, 0x5000)?;
        let store = access(&mut sim, "l1-0", AccessKind::NC_STORE, 0x5000)?;
        assert_eq!(store.state, State::NON_COHERENT);
        assert_eq!(state(&sim, "l2", 0x5000)?, State::EXCLUSIVE);

        let stats = sim.stats();
        diff::assert_eq!(stats.caches["l1-0"].num_messages(AccessKind::MESSAGE), 1);

        let l2 = sim.module_id("l2")?;
        let l2 = &sim.hierarchy().modules[l2];
        let (set, way) = l2
            .cache
            .find_valid(0x5000)
            .ok_or_else(|| eyre::eyre!("block missing in l2"))?;
        assert_eq!(l2.directory.entry(set, way).owner, None);

        // another reader must not get an exclusive copy
        let load = access(&mut sim, "l1-1", AccessKind::LOAD, 0x5000)?;
        assert_eq!(load.state, State::SHARED, "{policy:?}");
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_nc_store_writes_back_modified() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        access(&mut sim, "l1-0", AccessKind::LOAD, 0x5400)?;
        access(&mut sim, "l1-0", AccessKind::STORE, 0x5400)?;
        let store = access(&mut sim, "l1-0", AccessKind::NC_STORE, 0x5400)?;
        assert_eq!(store.state, State::NON_COHERENT);
        assert_eq!(state(&sim, "l2", 0x5400)?, State::OWNED);

        let stats = sim.stats();
        diff::assert_eq!(stats.caches["l1-0"].dirty_evictions, 1);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_nc_store_on_shared_is_local() -> eyre::Result<()> {
    testing::init_logging();
    let mut sim = Simulator::new(testing::two_level(Policy::Snoop))?;
    access(&mut sim, "l1-0", AccessKind::LOAD, 0x5800)?;
    access(&mut sim, "l1-1", AccessKind::LOAD, 0x5800)?;
    let before = sim.stats().caches["l1-1"].messages.clone();
    let store = access(&mut sim, "l1-1", AccessKind::NC_STORE, 0x5800)?;
    assert_eq!(store.status, RequestStatus::HIT);
    assert_eq!(store.state, State::NON_COHERENT);
    diff::assert_eq!(sim.stats().caches["l1-1"].messages, before);
    assert_eq!(state(&sim, "l1-0", 0x5800)?, State::SHARED);
    sim.check_all()?;
    Ok(())
}

#[test]
fn test_useful_prefetch() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::two_level(policy))?;
        let prefetch = access(&mut sim, "l1-0", AccessKind::PREFETCH, 0x6000)?;
        assert_eq!(prefetch.status, RequestStatus::MISS);
        assert_eq!(prefetch.state, State::EXCLUSIVE);

        let load = access(&mut sim, "l1-0", AccessKind::LOAD, 0x6000)?;
        assert_eq!(load.status, RequestStatus::HIT);
        let again = access(&mut sim, "l1-0", AccessKind::LOAD, 0x6000)?;
        assert_eq!(again.status, RequestStatus::HIT);

        diff::assert_eq!(sim.stats().caches["l1-0"].useful_prefetches, 1);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_prefetch_aborts_behind_access() -> eyre::Result<()> {
    testing::init_logging();
    let mut sim = Simulator::new(testing::two_level(Policy::Directory))?;
    let l1 = sim.module_id("l1-0")?;
    let load = sim.access(l1, AccessKind::LOAD, 0x7000)?;
    let prefetch = sim.access(l1, AccessKind::PREFETCH, 0x7000)?;
    sim.run()?;

    let load = sim.outcome(load).cloned().ok_or_else(|| eyre::eyre!("no outcome"))?;
    let prefetch = sim.outcome(prefetch).cloned().ok_or_else(|| eyre::eyre!("no outcome"))?;
    assert_eq!(load.status, RequestStatus::MISS);
    assert_eq!(prefetch.status, RequestStatus::ABORTED);
    diff::assert_eq!(sim.stats().caches["l1-0"].num_messages(AccessKind::READ_REQUEST), 1);
    diff::assert_eq!(sim.stats().caches["l1-0"].useful_prefetches, 0);
    Ok(())
}

#[test]
fn test_interleaved_second_level() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut config = testing::two_level(policy);
        let l2 = config.modules.remove(2);
        for eq in 0..2 {
            let mut bank = l2.clone();
            bank.name = format!("l2-{eq}");
            bank.range = Range::Interleaved {
                modulo: 2,
                div: u64::from(testing::BLOCK_SIZE),
                eq,
            };
            config.modules.insert(2 + eq as usize, bank);
        }
        let mut sim = Simulator::new(config)?;

        access(&mut sim, "l1-0", AccessKind::LOAD, 0x0)?;
        access(&mut sim, "l1-1", AccessKind::STORE, 0x40)?;
        assert_eq!(state(&sim, "l2-0", 0x0)?, State::EXCLUSIVE);
        assert_eq!(state(&sim, "l2-1", 0x0)?, State::INVALID);
        assert_eq!(state(&sim, "l2-1", 0x40)?, State::EXCLUSIVE);
        assert_eq!(state(&sim, "l2-0", 0x40)?, State::INVALID);
        assert_eq!(state(&sim, "l1-1", 0x40)?, State::MODIFIED);

        let stats = sim.stats();
        diff::assert_eq!(stats.caches["l2-0"].num_messages(AccessKind::READ_REQUEST), 1);
        diff::assert_eq!(stats.caches["l2-1"].num_messages(AccessKind::WRITE_REQUEST), 1);
        sim.check_all()?;
    }
    Ok(())
}

#[test]
fn test_three_level_sharing_across_subtrees() -> eyre::Result<()> {
    testing::init_logging();
    for policy in POLICIES {
        let mut sim = Simulator::new(testing::three_level(policy))?;
        let load = access(&mut sim, "l1-0", AccessKind::LOAD, 0x40)?;
        assert_eq!(load.state, State::EXCLUSIVE);
        for module in ["l2-0", "l3", "mm"] {
            assert_eq!(state(&sim, module, 0x40)?, State::EXCLUSIVE, "{module}");
        }

        // the first copy is two levels away from the second reader
        let load = access(&mut sim, "l1-2", AccessKind::LOAD, 0x40)?;
        assert_eq!(load.state, State::SHARED, "{policy:?}");
        for module in ["l1-0", "l2-0", "l2-1"] {
            assert_eq!(state(&sim, module, 0x40)?, State::SHARED, "{module}");
        }
        sim.check_all()?;

        let store = access(&mut sim, "l1-2", AccessKind::STORE, 0x40)?;
        assert_eq!(store.state, State::MODIFIED);
        assert_eq!(state(&sim, "l1-0", 0x40)?, State::INVALID);
        assert_eq!(state(&sim, "l2-0", 0x40)?, State::INVALID);
        sim.check_all()?;
    }
    Ok(())
}

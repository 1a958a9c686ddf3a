use crate::{
    access::{AccessId, Arena, Frame, Kind},
    address,
    cache::State,
    coherence,
    config::Config,
    directory::{self, SharerDiscovery},
    error::Error,
    event::{EventQueue, Scheduler},
    interconn::{self, Interconnect},
    module::{Hierarchy, ModuleId},
    observer::{Observer, StatsCollector},
    protocol::{Event, Step},
};
use console::style;
use rand::{rngs::StdRng, SeedableRng};
use stats::{AccessKind, RequestStatus, Stats};
use std::collections::HashMap;

/// Result of a client access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub id: AccessId,
    pub module: ModuleId,
    pub kind: AccessKind,
    pub addr: address,
    pub status: RequestStatus,
    pub hit: bool,
    /// State the access left the block in.
    pub state: State,
    pub retries: usize,
    pub issue_cycle: u64,
    pub finish_cycle: u64,
}

impl Outcome {
    #[must_use]
    pub fn latency(&self) -> u64 {
        self.finish_cycle.saturating_sub(self.issue_cycle)
    }
}

/// Cycle level simulator of a cache hierarchy.
#[derive(Debug)]
pub struct Simulator<I = interconn::Network> {
    pub config: Config,
    pub(crate) hierarchy: Hierarchy,
    pub(crate) interconn: I,
    pub(crate) queue: EventQueue<Event>,
    pub(crate) frames: Arena<Frame>,
    pub(crate) next_id: AccessId,
    pub(crate) rng: StdRng,
    pub(crate) policy: Box<dyn SharerDiscovery>,
    pub(crate) collector: StatsCollector,
    pub(crate) observers: Vec<Box<dyn Observer>>,
    pub(crate) outcomes: HashMap<AccessId, Outcome>,
    /// Last cycle a client access retired, or the simulator went idle.
    pub(crate) last_progress: u64,
}

impl Simulator<interconn::Network> {
    pub fn new(config: Config) -> Result<Self, Error> {
        let interconn = interconn::Network::new(&config.networks);
        Self::with_interconnect(config, interconn)
    }
}

impl<I> Simulator<I>
where
    I: Interconnect,
{
    pub fn with_interconnect(config: Config, interconn: I) -> Result<Self, Error> {
        let hierarchy = Hierarchy::new(&config)?;
        let collector = StatsCollector::new(
            config.modules.iter().map(|module| &module.name),
            config.networks.iter().map(|network| &network.name),
        );
        log::info!("{config}");
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            policy: directory::policy(config.policy),
            hierarchy,
            interconn,
            queue: EventQueue::default(),
            frames: Arena::default(),
            next_id: 0,
            collector,
            observers: Vec::new(),
            outcomes: HashMap::new(),
            last_progress: 0,
            config,
        })
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    #[must_use]
    pub fn interconn(&self) -> &I {
        &self.interconn
    }

    pub fn module_id(&self, name: &str) -> Result<ModuleId, Error> {
        self.hierarchy.module_id(name)
    }

    #[inline]
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.queue.now()
    }

    /// Accesses that have not retired yet, including sub-requests.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.frames.len()
    }

    /// `module` has a free port and room for another in-flight access.
    #[must_use]
    pub fn can_access(&self, module: ModuleId) -> bool {
        self.hierarchy
            .get(module)
            .is_some_and(crate::module::Module::can_access)
    }

    /// Issue a client access in the current cycle.
    pub fn access(
        &mut self,
        module: ModuleId,
        kind: AccessKind,
        addr: address,
    ) -> Result<AccessId, Error> {
        if self.hierarchy.get(module).is_none() {
            return Err(Error::UnknownModule(module.to_string()));
        }
        let kind = match kind {
            AccessKind::LOAD => Kind::Load,
            AccessKind::STORE => Kind::Store,
            AccessKind::NC_STORE => Kind::NcStore,
            AccessKind::PREFETCH => Kind::Prefetch,
            other => return Err(Error::NotClient(other)),
        };
        if self.frames.is_empty() {
            self.last_progress = self.cycle();
        }
        let handle = self.spawn(kind, module, module, addr, None);
        self.schedule(handle, Step::start(&kind), 0);
        Ok(self.frame(handle)?.id)
    }

    /// Deliver the next event. Returns `false` once no event is left.
    ///
    /// Fails with [`Error::Stalled`] when accesses are in flight but none
    /// retired within `max_stall_cycles`. Accesses that keep retrying a
    /// request that can never succeed never drain the queue.
    pub fn step(&mut self) -> Result<bool, Error> {
        let Some(event) = self.queue.pop() else {
            return Ok(false);
        };
        self.collector.stats.sim.events += 1;
        self.dispatch(event)?;

        let stalled = self.cycle().saturating_sub(self.last_progress);
        let limit = self.config.max_stall_cycles;
        if limit > 0 && stalled > limit && !self.frames.is_empty() {
            self.dump_stuck();
            return Err(Error::Stalled {
                pending: self.frames.len(),
                cycles: stalled,
            });
        }
        Ok(true)
    }

    /// Run until every access has retired.
    pub fn run(&mut self) -> Result<(), Error> {
        while self.step()? {}
        if !self.frames.is_empty() {
            self.dump_stuck();
            return Err(Error::Deadlock {
                pending: self.frames.len(),
            });
        }
        Ok(())
    }

    /// Log every live access and every held entry lock.
    fn dump_stuck(&self) {
        for (handle, frame) in self.frames.iter() {
            log::error!(
                "{}: {handle} {frame} at {} waits since cycle {}",
                style("STUCK").red(),
                self.hierarchy.name(frame.target),
                frame.issue_cycle,
            );
        }
        for module in &self.hierarchy.modules {
            for (set, way) in module.locked_entries() {
                let lock = module.locks.get(set, way);
                let block = module.cache.block(set, way);
                let tag = block.transient_tag.unwrap_or(block.tag);
                log::error!(
                    "{}: {module} {set}:{way} (block {tag:#x}) held by {:?}, {} waiting",
                    style("LOCKED").red(),
                    lock.holder(),
                    lock.num_waiters(),
                );
            }
        }
    }

    /// Deliver all events due up to and including `cycle`, then move the
    /// clock to `cycle`.
    pub fn run_until(&mut self, cycle: u64) -> Result<(), Error> {
        while self.queue.peek_cycle().is_some_and(|next| next <= cycle) {
            self.step()?;
        }
        self.queue.advance_to(cycle);
        Ok(())
    }

    #[must_use]
    pub fn outcome(&self, id: AccessId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }

    /// Remove and return the outcome of a retired access.
    pub fn take_outcome(&mut self, id: AccessId) -> Option<Outcome> {
        self.outcomes.remove(&id)
    }

    #[must_use]
    pub fn state(&self, module: ModuleId, addr: address) -> State {
        self.hierarchy.state(module, addr)
    }

    pub fn check_coherence(&self, module: ModuleId, addr: address) -> Result<(), Error> {
        coherence::check(&self.hierarchy, module, addr)
    }

    /// Check every valid block of the first level modules.
    ///
    /// Only meaningful while no access is in flight.
    pub fn check_all(&self) -> Result<(), Error> {
        coherence::check_all(&self.hierarchy)
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let mut stats = self.collector.stats.clone();
        stats.sim.cycles = self.cycle();
        stats
    }
}

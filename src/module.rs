use crate::{
    address,
    cache::{BlockStore, State},
    config::{self, ModuleKind, Range},
    directory::Directory,
    error::Error,
    index::AccessIndex,
    interconn::NetworkId,
    lock::LockTable,
    port::PortArbiter,
};
use smallvec::SmallVec;

pub type ModuleId = usize;

/// A level of the hierarchy with its own block store, locks, ports and
/// in-flight access index.
#[derive(Debug)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub kind: ModuleKind,
    pub latency: u64,
    pub block_size: u32,
    pub mshr_size: usize,
    pub range: Range,
    pub low_network: Option<NetworkId>,
    pub high_network: Option<NetworkId>,
    /// Modules below, reached over the low network.
    pub low: Vec<ModuleId>,
    /// Modules above, in directory sharer order.
    pub high: Vec<ModuleId>,

    pub cache: BlockStore,
    pub locks: LockTable,
    pub ports: PortArbiter,
    pub index: AccessIndex,
    pub directory: Directory,
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Module {
    #[must_use]
    pub fn is_main_memory(&self) -> bool {
        self.kind == ModuleKind::MainMemory
    }

    #[must_use]
    pub fn serves(&self, addr: address) -> bool {
        self.range.contains(addr)
    }

    /// Position of `module` among the upper neighbors.
    #[must_use]
    pub fn high_index(&self, module: ModuleId) -> Option<usize> {
        self.high.iter().position(|high| *high == module)
    }

    /// Set and way of every entry whose lock is held.
    pub fn locked_entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let associativity = self.cache.associativity();
        (0..self.cache.num_sets())
            .flat_map(move |set| (0..associativity).map(move |way| (set, way)))
            .filter(|(set, way)| self.locks.is_locked(*set, *way))
    }

    /// A new client access can start.
    #[must_use]
    pub fn can_access(&self) -> bool {
        let mshr_free = self.mshr_size == 0 || self.index.num_in_flight() < self.mshr_size;
        self.ports.has_free_port() && mshr_free
    }
}

/// The module graph.
#[derive(Debug)]
pub struct Hierarchy {
    pub modules: Vec<Module>,
    pub networks: Vec<String>,
}

impl Hierarchy {
    /// Connect the configured modules through their network names.
    ///
    /// The lower neighbors of a module are the modules whose high network is
    /// its low network, and vice versa.
    pub fn new(config: &config::Config) -> Result<Self, config::Error> {
        config.validate()?;
        let networks: Vec<String> = config
            .networks
            .iter()
            .map(|network| network.name.clone())
            .collect();
        let network_id = |name: &Option<String>| -> Option<NetworkId> {
            let name = name.as_ref()?;
            networks.iter().position(|network| network == name)
        };

        let mut modules = Vec::with_capacity(config.modules.len());
        for (id, module) in config.modules.iter().enumerate() {
            let low: Vec<ModuleId> = config
                .modules
                .iter()
                .enumerate()
                .filter(|(_, other)| {
                    module.low_network.is_some() && other.high_network == module.low_network
                })
                .map(|(other, _)| other)
                .collect();
            let high: Vec<ModuleId> = config
                .modules
                .iter()
                .enumerate()
                .filter(|(_, other)| {
                    module.high_network.is_some() && other.low_network == module.high_network
                })
                .map(|(other, _)| other)
                .collect();
            if module.low_network.is_some() && low.is_empty() {
                return Err(config::Error::Module {
                    module: module.name.clone(),
                    message: "no module below".to_string(),
                });
            }

            modules.push(Module {
                id,
                name: module.name.clone(),
                kind: module.kind,
                latency: module.latency,
                block_size: module.block_size,
                mshr_size: module.mshr_size,
                range: module.range,
                low_network: network_id(&module.low_network),
                high_network: network_id(&module.high_network),
                cache: BlockStore::new(module),
                locks: LockTable::new(module.num_sets, module.associativity),
                ports: PortArbiter::new(module.num_ports),
                index: AccessIndex::default(),
                directory: Directory::new(module.num_sets, module.associativity, high.len()),
                low,
                high,
            });
        }
        for module in &modules {
            log::info!(
                "module {}: low={:?} high={:?}",
                module.name,
                module.low,
                module.high
            );
        }
        Ok(Self { modules, networks })
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn module_id(&self, name: &str) -> Result<ModuleId, Error> {
        self.modules
            .iter()
            .position(|module| module.name == name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }

    #[must_use]
    pub fn name(&self, id: ModuleId) -> &str {
        self.modules.get(id).map_or("?", |module| module.name.as_str())
    }

    /// The single lower module serving `addr`, or `None` for main memory.
    pub fn low_module(&self, id: ModuleId, addr: address) -> Result<Option<ModuleId>, Error> {
        let module = self
            .modules
            .get(id)
            .ok_or_else(|| Error::UnknownModule(id.to_string()))?;
        if module.low.is_empty() {
            return Ok(None);
        }
        let serving: SmallVec<[ModuleId; 4]> = module
            .low
            .iter()
            .copied()
            .filter(|low| self.modules[*low].serves(addr))
            .collect();
        match serving.as_slice() {
            [low] => Ok(Some(*low)),
            other => Err(Error::Routing {
                module: module.name.clone(),
                addr,
                found: other.len(),
            }),
        }
    }

    /// Like [`Hierarchy::low_module`], but main memory has nothing below.
    pub fn require_low_module(&self, id: ModuleId, addr: address) -> Result<ModuleId, Error> {
        self.low_module(id, addr)?.ok_or_else(|| Error::MissingNetwork {
            module: self.name(id).to_string(),
            which: "low",
        })
    }

    /// Upper neighbors of `id` that route `addr` through `id`.
    pub fn high_modules(&self, id: ModuleId, addr: address) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules
            .get(id)
            .into_iter()
            .flat_map(|module| module.high.iter().copied())
            .filter(move |high| matches!(self.low_module(*high, addr), Ok(Some(low)) if low == id))
    }

    #[must_use]
    pub fn state(&self, id: ModuleId, addr: address) -> State {
        self.modules
            .get(id)
            .map_or(State::INVALID, |module| module.cache.state_of(addr))
    }

    /// Modules sharing a low network can exchange data directly.
    #[must_use]
    pub fn are_peers(&self, a: ModuleId, b: ModuleId) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => a.low_network.is_some() && a.low_network == b.low_network,
            _ => false,
        }
    }
}

use crate::{address, interconn::HEADER_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("duplicate {what} name {name:?}")]
    Duplicate { what: &'static str, name: String },

    #[error("module {module}: {message}")]
    Module { module: String, message: String },

    #[error("module {module} references unknown network {network:?}")]
    UnknownNetwork { module: String, network: String },

    #[error("block size of {module} ({size}) differs from {expected} used by the rest of the hierarchy")]
    BlockSize {
        module: String,
        size: u32,
        expected: u32,
    },

    #[error("network {network}: buffer of {size} bytes cannot hold a {needed} byte data message")]
    BufferSize {
        network: String,
        size: u32,
        needed: u32,
    },

    #[error("no modules configured")]
    Empty,

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How coherence requests find the upper level copies of a block.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Point to point requests to the sharers recorded in the directory.
    #[default]
    Directory,
    /// Broadcast requests to every upper neighbor.
    Snoop,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    #[default]
    Cache,
    MainMemory,
}

/// A cache replacement policy
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    #[default]
    LRU,
    FIFO,
    RANDOM,
}

/// Victims in this state are preferred over the replacement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VictimBias {
    MODIFIED_FIRST,
    EXCLUSIVE_FIRST,
    SHARED_FIRST,
}

/// Addresses served by a module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Range {
    #[default]
    All,
    /// Inclusive bounds.
    Bounds { low: address, high: address },
    /// Serves `addr` when `(addr / div) % modulo == eq`.
    Interleaved { modulo: u64, div: u64, eq: u64 },
}

impl Range {
    #[must_use]
    pub fn contains(&self, addr: address) -> bool {
        match *self {
            Range::All => true,
            Range::Bounds { low, high } => (low..=high).contains(&addr),
            Range::Interleaved { modulo, div, eq } => (addr / div) % modulo == eq,
        }
    }
}

fn default_ports() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_max_stall_cycles() -> u64 {
    100_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    /// Input buffer size per destination in bytes (0 is unbounded).
    #[serde(default)]
    pub buffer_size: u32,
    #[serde(default)]
    pub latency: u64,
    /// Bytes per cycle (0 is unbounded).
    #[serde(default)]
    pub bandwidth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub kind: ModuleKind,
    pub num_sets: usize,
    pub associativity: usize,
    pub block_size: u32,
    pub latency: u64,
    #[serde(default = "default_ports")]
    pub num_ports: usize,
    /// Maximum in flight client accesses (0 is unlimited).
    #[serde(default)]
    pub mshr_size: usize,
    #[serde(default)]
    pub replacement_policy: ReplacementPolicy,
    #[serde(default)]
    pub victim_bias: Option<VictimBias>,
    #[serde(default)]
    pub range: Range,
    #[serde(default)]
    pub low_network: Option<String>,
    #[serde(default)]
    pub high_network: Option<String>,
}

impl Module {
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.num_sets * self.associativity * self.block_size as usize
    }

    #[must_use]
    pub fn is_main_memory(&self) -> bool {
        self.kind == ModuleKind::MainMemory
    }

    #[must_use]
    pub fn block_size_log2(&self) -> u32 {
        self.block_size.trailing_zeros()
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let size = human_bytes::human_bytes(self.total_bytes() as f64);
        write!(
            f,
            "{}: {size} ({} set, {}-way, {} byte line, {} cycles, {} ports)",
            self.name,
            self.num_sets,
            self.associativity,
            self.block_size,
            self.latency,
            self.num_ports
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: Policy,
    /// Let an upper level owner send data directly to a peer requester.
    ///
    /// Only used with the directory policy.
    #[serde(default)]
    pub peer_transfers: bool,
    #[serde(default = "default_true")]
    pub check_coherence: bool,
    #[serde(default)]
    pub seed: u64,
    /// Fail once accesses are in flight but none retired for this many
    /// cycles (0 disables the check).
    #[serde(default = "default_max_stall_cycles")]
    pub max_stall_cycles: u64,
    pub networks: Vec<Network>,
    pub modules: Vec<Module>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML config, or JSON if the file has a `.json` extension.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let Some(first) = self.modules.first() else {
            return Err(Error::Empty);
        };

        let mut networks = HashSet::new();
        for network in &self.networks {
            if !networks.insert(network.name.as_str()) {
                return Err(Error::Duplicate {
                    what: "network",
                    name: network.name.clone(),
                });
            }
            // a data reply that never fits is rejected forever
            let needed = first.block_size + HEADER_SIZE;
            if network.buffer_size != 0 && network.buffer_size < needed {
                return Err(Error::BufferSize {
                    network: network.name.clone(),
                    size: network.buffer_size,
                    needed,
                });
            }
        }

        let mut modules = HashSet::new();
        for module in &self.modules {
            if !modules.insert(module.name.as_str()) {
                return Err(Error::Duplicate {
                    what: "module",
                    name: module.name.clone(),
                });
            }
            let invalid = |message: &str| Error::Module {
                module: module.name.clone(),
                message: message.to_string(),
            };
            if module.num_sets == 0 || !module.num_sets.is_power_of_two() {
                return Err(invalid("number of sets must be a power of two"));
            }
            if module.associativity == 0 {
                return Err(invalid("associativity must be at least one"));
            }
            if module.block_size == 0 || !module.block_size.is_power_of_two() {
                return Err(invalid("block size must be a power of two"));
            }
            if module.num_ports == 0 {
                return Err(invalid("at least one port is required"));
            }
            if module.block_size != first.block_size {
                return Err(Error::BlockSize {
                    module: module.name.clone(),
                    size: module.block_size,
                    expected: first.block_size,
                });
            }
            if let Range::Interleaved { modulo, div, eq } = module.range {
                if modulo == 0 || div == 0 || eq >= modulo {
                    return Err(invalid("bad interleaved range"));
                }
            }
            match (module.kind, &module.low_network) {
                (ModuleKind::MainMemory, Some(_)) => {
                    return Err(invalid("main memory cannot have a low network"));
                }
                (ModuleKind::Cache, None) => {
                    return Err(invalid("cache needs a low network"));
                }
                _ => {}
            }
            for network in module.low_network.iter().chain(module.high_network.iter()) {
                if !networks.contains(network.as_str()) {
                    return Err(Error::UnknownNetwork {
                        module: module.name.clone(),
                        network: network.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "policy: {:?}", self.policy)?;
        for module in &self.modules {
            writeln!(f, "  {module}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Error, Policy, Range};
    use color_eyre::eyre;

    const TWO_LEVEL: &str = r"
policy: snoop
networks:
  - name: l1-mm
    latency: 2
modules:
  - name: l1
    num_sets: 4
    associativity: 2
    block_size: 64
    latency: 1
    low_network: l1-mm
  - name: mm
    kind: main_memory
    num_sets: 16
    associativity: 4
    block_size: 64
    latency: 10
    high_network: l1-mm
";

    #[test]
    fn test_parse_two_level() -> eyre::Result<()> {
        let config = Config::from_yaml(TWO_LEVEL)?;
        assert_eq!(config.policy, Policy::Snoop);
        assert!(config.check_coherence);
        assert_eq!(config.max_stall_cycles, 100_000);
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].num_ports, 2);
        assert_eq!(config.modules[0].range, Range::All);
        assert!(config.modules[1].is_main_memory());
        assert!(config.modules[0]
            .to_string()
            .ends_with("(4 set, 2-way, 64 byte line, 1 cycles, 2 ports)"));
        Ok(())
    }

    #[test]
    fn test_rejects_mismatched_block_size() {
        let yaml = TWO_LEVEL.replacen("block_size: 64", "block_size: 32", 1);
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, Error::BlockSize { size: 64, .. }), "{err}");
    }

    #[test]
    fn test_rejects_buffer_smaller_than_data_message() -> eyre::Result<()> {
        let yaml = TWO_LEVEL.replace("latency: 2", "latency: 2\n    buffer_size: 64");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(
            matches!(
                err,
                Error::BufferSize {
                    size: 64,
                    needed: 72,
                    ..
                }
            ),
            "{err}"
        );

        // exactly one data message fits
        let yaml = TWO_LEVEL.replace("latency: 2", "latency: 2\n    buffer_size: 72");
        let config = Config::from_yaml(&yaml)?;
        assert_eq!(config.networks[0].buffer_size, 72);
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_network() {
        let yaml = TWO_LEVEL.replace("low_network: l1-mm", "low_network: nope");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, Error::UnknownNetwork { .. }), "{err}");
    }

    #[test]
    fn test_range_contains() {
        let bounds = Range::Bounds {
            low: 0x100,
            high: 0x1ff,
        };
        assert!(bounds.contains(0x100));
        assert!(bounds.contains(0x1ff));
        assert!(!bounds.contains(0x200));

        let interleaved = Range::Interleaved {
            modulo: 2,
            div: 64,
            eq: 1,
        };
        assert!(!interleaved.contains(0));
        assert!(interleaved.contains(64));
        assert!(!interleaved.contains(128));
    }

    #[test]
    fn test_sample_config() -> eyre::Result<()> {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/two-level.yaml");
        let config = Config::from_path(path)?;
        assert_eq!(config.policy, Policy::Directory);
        assert!(config.peer_transfers);
        assert_eq!(config.modules.len(), 5);
        assert_eq!(
            config.modules[3].range,
            Range::Interleaved {
                modulo: 2,
                div: 64,
                eq: 1
            }
        );
        Ok(())
    }

    #[test]
    fn test_json_matches_yaml() -> eyre::Result<()> {
        let config = Config::from_yaml(TWO_LEVEL)?;
        let json = serde_json::to_string(&config)?;
        assert_eq!(Config::from_json(&json)?, config);
        Ok(())
    }
}

#![allow(non_camel_case_types, clippy::upper_case_acronyms)]

pub mod cache;
pub mod mem;
pub mod sim;

pub use cache::{Cache, Latency, PerCache, RequestStatus, RetryReason};
pub use mem::AccessKind;
pub use sim::{Network, Sim};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sim: Sim,
    pub caches: PerCache,
    pub networks: IndexMap<String, Network>,
}

impl Stats {
    #[must_use]
    pub fn new<M, N>(modules: M, networks: N) -> Self
    where
        M: IntoIterator,
        M::Item: ToString,
        N: IntoIterator,
        N::Item: ToString,
    {
        Self {
            sim: Sim::default(),
            caches: PerCache(
                modules
                    .into_iter()
                    .map(|name| (name.to_string(), Cache::default()))
                    .collect(),
            ),
            networks: networks
                .into_iter()
                .map(|name| (name.to_string(), Network::default()))
                .collect(),
        }
    }
}

/// One row of the flattened per module access table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRow {
    pub module: String,
    pub kind: AccessKind,
    pub status: RequestStatus,
    pub count: usize,
}

impl Stats {
    /// Flatten the access counters into rows.
    ///
    /// The tuple keyed maps cannot be serialized to json directly.
    #[must_use]
    pub fn access_rows(&self) -> Vec<AccessRow> {
        self.caches
            .iter()
            .flat_map(|(module, stats)| {
                stats
                    .flatten()
                    .into_iter()
                    .map(move |((kind, status), count)| AccessRow {
                        module: module.clone(),
                        kind,
                        status,
                        count,
                    })
            })
            .collect()
    }
}

use crate::{
    access::AccessId, address, error::Error as SimError, interconn::Interconnect, sim::Simulator,
};
use serde::{Deserialize, Serialize};
use stats::AccessKind;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Client access issued at a given cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub cycle: u64,
    pub module: String,
    pub kind: AccessKind,
    pub addr: address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    pub commands: Vec<Command>,
}

impl Trace {
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML trace, or JSON if the file has a `.json` extension.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Self::from_yaml(&content),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Issue every command of `trace` and run until all accesses retired.
///
/// A command is issued at its cycle, or later while its module has no free
/// port or miss slot. Commands are issued in trace order.
/// Returns the access ids in trace order.
pub fn run<I>(sim: &mut Simulator<I>, trace: &Trace) -> Result<Vec<AccessId>, SimError>
where
    I: Interconnect,
{
    let mut ids = Vec::with_capacity(trace.len());
    for command in &trace.commands {
        let module = sim.module_id(&command.module)?;
        if command.cycle > sim.cycle() {
            sim.run_until(command.cycle)?;
        }
        while !sim.can_access(module) {
            if !sim.step()? {
                return Err(SimError::Deadlock {
                    pending: sim.num_pending(),
                });
            }
        }
        log::trace!(
            "cycle {}: issue {} {} {:#x}",
            sim.cycle(),
            command.module,
            command.kind,
            command.addr
        );
        ids.push(sim.access(module, command.kind, command.addr)?);
    }
    sim.run()?;
    log::info!(
        "issued {} accesses, done after {} cycles",
        ids.len(),
        sim.cycle()
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::Trace;
    use crate::{config::Policy, sim::Simulator, testing, RequestStatus, State};
    use color_eyre::eyre;
    use stats::AccessKind;

    const TRACE: &str = r#"
- cycle: 0
  module: l1-0
  kind: LOAD
  addr: 0x1000
- cycle: 0
  module: l1-1
  kind: LOAD
  addr: 0x1000
- cycle: 200
  module: l1-1
  kind: STORE
  addr: 0x1008
"#;

    #[test]
    fn test_parse_trace() -> eyre::Result<()> {
        let trace = Trace::from_yaml(TRACE)?;
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.commands[2].kind, AccessKind::STORE);
        assert_eq!(trace.commands[2].addr, 0x1008);
        assert_eq!(trace.commands[2].cycle, 200);
        Ok(())
    }

    #[test]
    fn test_run_trace() -> eyre::Result<()> {
        testing::init_logging();
        let trace = Trace::from_yaml(TRACE)?;
        let mut sim = Simulator::new(testing::two_level(Policy::Directory))?;
        let ids = super::run(&mut sim, &trace)?;
        assert_eq!(ids.len(), 3);

        let store = sim
            .outcome(ids[2])
            .ok_or_else(|| eyre::eyre!("store did not finish"))?;
        assert!(store.issue_cycle >= 200);
        assert_eq!(store.state, State::MODIFIED);
        assert_eq!(store.status, RequestStatus::HIT);

        let l1_0 = sim.module_id("l1-0")?;
        assert_eq!(sim.state(l1_0, 0x1000), State::INVALID);
        assert_eq!(sim.stats().sim.accesses, 3);
        sim.check_all()?;
        Ok(())
    }

    #[test]
    fn test_sample_trace() -> eyre::Result<()> {
        testing::init_logging();
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configs");
        let config = crate::Config::from_path(dir.join("two-level.yaml"))?;
        let trace = Trace::from_path(dir.join("trace.yaml"))?;
        let mut sim = Simulator::new(config)?;
        let ids = super::run(&mut sim, &trace)?;
        assert_eq!(ids.len(), trace.len());

        let l1_0 = sim.module_id("l1-0")?;
        let l1_1 = sim.module_id("l1-1")?;
        assert_eq!(sim.state(l1_0, 0x2000), State::INVALID);
        assert_eq!(sim.state(l1_1, 0x2000), State::MODIFIED);
        sim.check_all()?;
        Ok(())
    }
}

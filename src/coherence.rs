use crate::{address, cache::State, error::Error, module::Hierarchy, module::ModuleId};
use std::collections::HashSet;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "coherence violation at {addr:#x}: {issuer} is {issuer_state} but {relation} {other} is {other_state}"
)]
pub struct Violation {
    pub addr: address,
    pub issuer: String,
    pub issuer_state: State,
    pub relation: Relation,
    pub other: String,
    pub other_state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Relation {
    #[strum(serialize = "ancestor")]
    Ancestor,
    #[strum(serialize = "module")]
    Other,
}

/// Check the state of `addr` in `issuer` against the rest of the hierarchy.
///
/// Modules on the path to main memory must cover the issuer: an exclusive
/// block needs exclusive (or non-coherent) ancestors, a shared block needs a
/// shared or owned parent and a copy in every further ancestor.
/// Every other module must not contradict the issuer: nobody else holds an
/// exclusive block, and an owned block is only shared with clean copies.
/// Non-coherent blocks are not checked, and neither are blocks whose way is
/// locked for replacement.
pub fn check(hierarchy: &Hierarchy, issuer: ModuleId, addr: address) -> Result<(), Error> {
    let state = hierarchy.state(issuer, addr);
    if matches!(state, State::INVALID | State::NON_COHERENT) {
        return Ok(());
    }
    let violation = |relation, other: ModuleId, other_state| {
        let violation = Violation {
            addr,
            issuer: hierarchy.name(issuer).to_string(),
            issuer_state: state,
            relation,
            other: hierarchy.name(other).to_string(),
            other_state,
        };
        log::error!("{violation}");
        Err(Error::Coherence(violation))
    };

    let mut path = vec![issuer];
    let mut current = issuer;
    while let Some(low) = hierarchy.low_module(current, addr)? {
        let low_state = hierarchy.state(low, addr);
        let parent = current == issuer;
        let covered = match state {
            State::MODIFIED | State::EXCLUSIVE => matches!(
                low_state,
                State::MODIFIED | State::EXCLUSIVE | State::NON_COHERENT
            ),
            _ if parent => matches!(
                low_state,
                State::SHARED | State::OWNED | State::NON_COHERENT
            ),
            _ => low_state.is_valid(),
        };
        if !covered {
            return violation(Relation::Ancestor, low, low_state);
        }
        path.push(low);
        current = low;
    }

    // the subtree of the issuer is covered by its own checks
    let mut pending: Vec<ModuleId> = path
        .iter()
        .skip(1)
        .flat_map(|module| hierarchy.high_modules(*module, addr))
        .filter(|module| !path.contains(module))
        .collect();
    let mut visited = HashSet::new();
    while let Some(other) = pending.pop() {
        if !visited.insert(other) {
            continue;
        }
        pending.extend(hierarchy.high_modules(other, addr));

        let module = &hierarchy.modules[other];
        let Some((set, way)) = module.cache.find_valid(addr) else {
            continue;
        };
        let block = module.cache.block(set, way);
        if block.state == State::NON_COHERENT
            || (block.is_replacing() && module.locks.is_locked(set, way))
        {
            continue;
        }
        let compatible = match state {
            State::MODIFIED | State::EXCLUSIVE => false,
            State::OWNED => block.state == State::SHARED,
            _ => !block.state.is_exclusive(),
        };
        if !compatible {
            return violation(Relation::Other, other, block.state);
        }
    }
    Ok(())
}

/// Check every valid block of the first level modules.
///
/// Inner levels are covered through the ancestor checks of the modules
/// above them.
pub fn check_all(hierarchy: &Hierarchy) -> Result<(), Error> {
    for module in hierarchy.modules.iter().filter(|module| module.high.is_empty()) {
        for (tag, _) in module.cache.valid_blocks() {
            check(hierarchy, module.id, tag)?;
        }
    }
    Ok(())
}

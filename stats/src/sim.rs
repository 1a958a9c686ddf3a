use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sim {
    pub cycles: u64,
    /// client accesses that ran to completion
    pub accesses: u64,
    pub events: u64,
}

impl std::ops::AddAssign for Sim {
    fn add_assign(&mut self, other: Self) {
        self.cycles += other.cycles;
        self.accesses += other.accesses;
        self.events += other.events;
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub messages: u64,
    pub bytes: u64,
    /// sends rejected for lack of buffer space
    pub rejected: u64,
}

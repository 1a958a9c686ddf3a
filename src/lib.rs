#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::too_many_arguments,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions
)]

pub mod access;
pub mod cache;
pub mod coherence;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod index;
pub mod interconn;
pub mod lock;
pub mod module;
pub mod observer;
pub mod port;
pub mod protocol;
pub mod set_index;
pub mod sim;
pub mod trace;

#[cfg(test)]
pub mod testing;

pub use cache::State;
pub use config::Config;
pub use error::Error;
pub use sim::{Outcome, Simulator};
pub use stats::{AccessKind, RequestStatus};

pub type address = u64;

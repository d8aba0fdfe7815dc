//! Job step abstractions (Command pattern).
//!
//! - [`Command`]: a single operation on the target store
//! - [`Step`]: a named command plus the databases it needs
//! - [`MenuEntry`]: how a step is listed to the operator
//!
//! Steps are registered with the [`Orchestrator`](crate::orchestrator::Orchestrator),
//! which owns the handler for every command kind.

mod job;

pub use job::{Command, MenuEntry, Step};

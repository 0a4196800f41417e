//! Concrete step implementations.
//!
//! Adapters for specific EDA tools live out of tree; what ships here is
//! the generic [`CommandStep`], which wraps an arbitrary external command
//! in the step contract and is the extension point pipeline documents use.

mod command;

pub use command::{CommandStep, CommandStepSpec};

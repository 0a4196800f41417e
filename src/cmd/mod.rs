//! CLI command implementations.
//!
//! | Module | Commands handled      |
//! |--------|-----------------------|
//! | `run`  | `Run`, `Check`        |
//! | `list` | `Steps`, `Flows`      |

pub mod list;
pub mod run;

pub use list::{cmd_flows, cmd_steps};
pub use run::{cmd_check, cmd_run};

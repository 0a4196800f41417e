//! Terminal UI and progress observation.

mod progress;

pub use progress::{FlowProgress, NullProgress, ProgressObserver};

//! Flow orchestration.
//!
//! A flow drives an ordered or graph-shaped collection of steps over an
//! initial [`DesignState`](crate::state::DesignState) and a resolved
//! [`Config`](crate::config::Config), producing a [`FlowReport`]: the final
//! state, the ordered list of executed steps, and the aggregated errors.
//!
//! Two scheduling strategies exist:
//! - [`SequentialFlow`] — strict linear order over a declared pipeline
//! - [`ProgrammableFlow`] — user-defined logic over lazily-resolved,
//!   future-backed state handles, enabling concurrent branches

mod graph;
mod sequential;
mod spec;

pub use graph::{FlowScript, GraphContext, ProgrammableFlow, StateHandle};
pub use sequential::SequentialFlow;
pub use spec::{
    FlowRegistry, FlowSpec, PIPELINE_SCHEMA_VERSION, PipelineDoc, PipelineMeta, PipelineSteps,
    SubstitutionSet, pattern_matches, resolve_pipeline,
};

use crate::config::Variable;
use crate::errors::{FlowError, StepError};
use crate::state::DesignState;
use crate::step::{ExecutedStep, Step, StepId};
use crate::ui::ProgressObserver;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

/// Where a run lands on disk.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run tag; generated from the wall clock and a random suffix when
    /// absent.
    pub tag: Option<String>,
    /// Directory that holds one subdirectory per run.
    pub base_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tag: None,
            base_dir: PathBuf::from("runs"),
        }
    }
}

impl RunOptions {
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    fn resolve_tag(&self) -> String {
        self.tag.clone().unwrap_or_else(|| {
            let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("RUN_{stamp}_{}", &suffix[..8])
        })
    }
}

/// Per-run directory allocation. Every step gets its own numbered,
/// isolated working directory under the run directory.
#[derive(Debug)]
pub(crate) struct RunDirs {
    run_dir: PathBuf,
    counter: AtomicUsize,
}

impl RunDirs {
    pub(crate) fn create(options: &RunOptions) -> Result<Self, FlowError> {
        let run_dir = options.base_dir.join(options.resolve_tag());
        std::fs::create_dir_all(&run_dir).map_err(|source| FlowError::RunDir {
            path: run_dir.clone(),
            source,
        })?;
        Ok(Self {
            run_dir,
            counter: AtomicUsize::new(0),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.run_dir
    }

    pub(crate) fn next_step_dir(&self, id: &StepId) -> PathBuf {
        let ordinal = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_dir.join(format!("{ordinal:02}-{}", id.slug()))
    }
}

/// Terminal outcome of one flow invocation.
#[derive(Debug)]
pub enum FlowOutcome {
    /// Every step succeeded.
    Completed { state: DesignState },
    /// A final state was produced, but deferred errors were recorded along
    /// the way; the run counts as failed and the errors must be surfaced.
    CompletedWithDeferred {
        state: DesignState,
        errors: Vec<StepError>,
    },
    /// A fatal error stopped the chain; no usable final state.
    Aborted { error: StepError },
}

/// The public result of a flow invocation.
#[derive(Debug)]
pub struct FlowReport {
    pub flow: String,
    pub outcome: FlowOutcome,
    /// Every step instance that actually ran, in completion order.
    pub executed: Vec<ExecutedStep>,
    pub duration: Duration,
    pub run_dir: PathBuf,
}

impl FlowReport {
    /// Clean success: final state, no deferred errors.
    pub fn is_clean(&self) -> bool {
        matches!(self.outcome, FlowOutcome::Completed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, FlowOutcome::Aborted { .. })
    }

    /// The final state, present unless the flow aborted.
    pub fn final_state(&self) -> Option<&DesignState> {
        match &self.outcome {
            FlowOutcome::Completed { state }
            | FlowOutcome::CompletedWithDeferred { state, .. } => Some(state),
            FlowOutcome::Aborted { .. } => None,
        }
    }

    pub fn deferred_errors(&self) -> &[StepError] {
        match &self.outcome {
            FlowOutcome::CompletedWithDeferred { errors, .. } => errors,
            _ => &[],
        }
    }

    pub fn fatal_error(&self) -> Option<&StepError> {
        match &self.outcome {
            FlowOutcome::Aborted { error } => Some(error),
            _ => None,
        }
    }
}

/// A flow instance: holds its configuration and resolved scheduling
/// description, runs at most once.
#[async_trait]
pub trait Flow: Send {
    fn name(&self) -> &str;

    /// Execute the flow over `initial`. A second call on the same instance
    /// fails with [`FlowError::AlreadyRan`].
    async fn run(
        &mut self,
        initial: DesignState,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<FlowReport, FlowError>;
}

/// Union of the flow-level variables and every step's declared variables,
/// first declaration of a name wins. This is the schema the run's
/// configuration resolves against.
pub fn collect_variables(flow_variables: &[Variable], steps: &[Arc<dyn Step>]) -> Vec<Variable> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    let step_vars = steps.iter().flat_map(|step| step.config_variables());
    for var in crate::config::common_variables()
        .into_iter()
        .chain(flow_variables.iter().cloned())
        .chain(step_vars)
    {
        if seen.insert(var.name.clone()) {
            out.push(var);
        } else if let Some(first) = out.iter().find(|v| v.name == var.name)
            && first.kind != var.kind
        {
            warn!(
                variable = %var.name,
                "conflicting kind declarations; keeping the first"
            );
        }
    }
    out
}

//! Programmable graph-shaped flows.
//!
//! A [`ProgrammableFlow`] hands scheduling to user logic (a
//! [`FlowScript`]). The script launches steps through a [`GraphContext`]
//! and gets back [`StateHandle`]s: forward references to not-yet-computed
//! states. Nothing runs at launch time; resolving a handle triggers the
//! minimal upstream chain, memoized so repeated resolution is cheap, and
//! independently-resolved chains execute concurrently. A handle nobody
//! resolves never executes at all.

use crate::config::Config;
use crate::errors::{FlowError, StepError};
use crate::flow::{Flow, FlowOutcome, FlowReport, RunDirs, RunOptions};
use crate::state::DesignState;
use crate::step::{ExecutedStep, StepId, StepInstance, StepRegistry};
use crate::ui::ProgressObserver;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// User-defined scheduling logic for a [`ProgrammableFlow`].
///
/// The script owns severity propagation across its dependency edges: a
/// fatal error surfaces when a handle downstream of it is resolved, and it
/// is up to the script whether to abandon the rest of the graph or keep
/// resolving independent branches.
#[async_trait]
pub trait FlowScript: Send + Sync {
    async fn run(
        &self,
        ctx: &GraphContext,
        initial: StateHandle,
    ) -> Result<DesignState, StepError>;
}

struct GraphShared {
    config: Config,
    registry: Arc<StepRegistry>,
    run: RunDirs,
    executed: Mutex<Vec<ExecutedStep>>,
    deferred: Mutex<Vec<StepError>>,
    progress: Arc<dyn ProgressObserver>,
    stage: AtomicUsize,
}

/// The script's window into a running programmable flow: step launching,
/// configuration access, and explicit stage bookkeeping.
pub struct GraphContext {
    shared: Arc<GraphShared>,
}

impl GraphContext {
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Wrap an existing state in a pre-resolved handle.
    pub fn source(&self, state: DesignState) -> StateHandle {
        StateHandle {
            node: Arc::new(Node {
                kind: NodeKind::Source(state),
                cell: OnceCell::new(),
            }),
        }
    }

    /// Launch a step against `input`. Returns immediately with a handle to
    /// the step's future output; the step does not start until the handle
    /// (or something depending on it) is resolved.
    pub fn launch(&self, id: &str, input: &StateHandle) -> Result<StateHandle, FlowError> {
        let config = self.shared.config.clone();
        self.launch_with_config(&config, id, input)
    }

    /// Like [`GraphContext::launch`], but binding a derived configuration.
    /// This is how exploration branches run the same step with different
    /// parameters.
    pub fn launch_with_config(
        &self,
        config: &Config,
        id: &str,
        input: &StateHandle,
    ) -> Result<StateHandle, FlowError> {
        let id: StepId = id.parse()?;
        let step = self.shared.registry.resolve(&id)?;
        Ok(StateHandle {
            node: Arc::new(Node {
                kind: NodeKind::Step {
                    step,
                    config: config.clone(),
                    input: input.clone(),
                    shared: self.shared.clone(),
                },
                cell: OnceCell::new(),
            }),
        })
    }

    /// Record a deferred error from the script itself (e.g. a soft metric
    /// threshold checked between steps).
    pub fn record_deferred(&self, error: StepError) {
        self.shared.deferred.lock().unwrap().push(error);
    }

    /// Announce how many stages the script intends to run. Stages group
    /// logically-related launches and are decoupled from the step count.
    pub fn set_stage_count(&self, total: usize) {
        self.shared.progress.set_stage_count(total);
    }

    /// Open a stage. Returns its index for [`GraphContext::end_stage`].
    pub fn start_stage(&self, name: &str) -> usize {
        let index = self.shared.stage.fetch_add(1, Ordering::SeqCst);
        self.shared.progress.stage_started(index, name);
        index
    }

    pub fn end_stage(&self, index: usize) {
        self.shared.progress.stage_ended(index);
    }
}

enum NodeKind {
    Source(DesignState),
    Step {
        step: Arc<dyn crate::step::Step>,
        config: Config,
        input: StateHandle,
        shared: Arc<GraphShared>,
    },
}

struct Node {
    kind: NodeKind,
    cell: OnceCell<Result<DesignState, StepError>>,
}

/// A forward reference to a not-yet-computed state.
///
/// Cloning is cheap; all clones share one memoized computation, so
/// resolving the same handle twice runs its step once. Dropping every
/// clone of an unresolved handle is an implicit cancellation.
#[derive(Clone)]
pub struct StateHandle {
    node: Arc<Node>,
}

impl StateHandle {
    /// Resolve the handle, triggering execution of this node and of any
    /// unresolved upstream nodes it depends on. A fatal error anywhere in
    /// the chain poisons this handle and every other handle downstream of
    /// the failure, surfaced identically to each resolver.
    pub fn resolve(&self) -> BoxFuture<'_, Result<DesignState, StepError>> {
        async move {
            self.node
                .cell
                .get_or_init(|| async {
                    match &self.node.kind {
                        NodeKind::Source(state) => Ok(state.clone()),
                        NodeKind::Step {
                            step,
                            config,
                            input,
                            shared,
                        } => run_node(step, config, input, shared).await,
                    }
                })
                .await
                .clone()
        }
        .boxed()
    }

    /// Whether this handle has already been resolved (successfully or not).
    pub fn is_resolved(&self) -> bool {
        self.node.cell.initialized()
    }
}

async fn run_node(
    step: &Arc<dyn crate::step::Step>,
    config: &Config,
    input: &StateHandle,
    shared: &Arc<GraphShared>,
) -> Result<DesignState, StepError> {
    let state_in = input.resolve().await?;

    let id = step.id();
    let instance =
        StepInstance::new(step.clone(), config, state_in, shared.run.next_step_dir(&id))?;

    // Spawned so that independently-resolved chains run on separate tasks.
    let (record, outcome) = tokio::spawn(instance.execute())
        .await
        .map_err(|e| StepError::fault(&id, format!("step task panicked: {e}")))?;

    shared.progress.step_finished(&record);
    shared.executed.lock().unwrap().push(record);

    match outcome {
        Ok((state, errors)) => {
            shared.deferred.lock().unwrap().extend(errors);
            Ok(state)
        }
        Err(e) => Err(e),
    }
}

/// A flow whose scheduling is driven by a [`FlowScript`] instead of a
/// static step list.
pub struct ProgrammableFlow {
    name: String,
    script: Arc<dyn FlowScript>,
    registry: Arc<StepRegistry>,
    config: Config,
    options: RunOptions,
    ran: bool,
}

impl ProgrammableFlow {
    pub fn new(
        name: &str,
        script: Arc<dyn FlowScript>,
        registry: Arc<StepRegistry>,
        config: Config,
    ) -> Self {
        Self {
            name: name.to_string(),
            script,
            registry,
            config,
            options: RunOptions::default(),
            ran: false,
        }
    }

    pub fn with_run_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Flow for ProgrammableFlow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &mut self,
        initial: DesignState,
        progress: Arc<dyn ProgressObserver>,
    ) -> Result<FlowReport, FlowError> {
        if self.ran {
            return Err(FlowError::AlreadyRan);
        }
        self.ran = true;

        let started = Instant::now();
        let run = RunDirs::create(&self.options)?;
        let run_dir = run.path().to_path_buf();
        if let Err(e) = self.config.save(&run_dir.join("resolved.json")) {
            warn!(error = %e, "could not persist resolved configuration");
        }

        info!(
            flow = %self.name,
            run_dir = %run_dir.display(),
            "starting programmable flow"
        );

        let shared = Arc::new(GraphShared {
            config: self.config.clone(),
            registry: self.registry.clone(),
            run,
            executed: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            progress,
            stage: AtomicUsize::new(0),
        });
        let ctx = GraphContext {
            shared: shared.clone(),
        };
        let initial = ctx.source(initial);

        let result = self.script.run(&ctx, initial).await;

        let executed = std::mem::take(&mut *shared.executed.lock().unwrap());
        let deferred = std::mem::take(&mut *shared.deferred.lock().unwrap());

        let outcome = match result {
            Ok(state) => {
                if let Err(e) = state.save(&run_dir.join("state.json")) {
                    warn!(error = %e, "could not persist final state");
                }
                if deferred.is_empty() {
                    info!(flow = %self.name, "flow completed cleanly");
                    FlowOutcome::Completed { state }
                } else {
                    warn!(
                        flow = %self.name,
                        count = deferred.len(),
                        "flow completed with deferred errors"
                    );
                    FlowOutcome::CompletedWithDeferred {
                        state,
                        errors: deferred,
                    }
                }
            }
            Err(error) => FlowOutcome::Aborted { error },
        };

        Ok(FlowReport {
            flow: self.name.clone(),
            outcome,
            executed,
            duration: started.elapsed(),
            run_dir,
        })
    }
}

//! Strict linear pipeline execution.

use crate::config::Config;
use crate::errors::{FlowError, StepError};
use crate::flow::spec::{FlowSpec, pattern_matches};
use crate::flow::{Flow, FlowOutcome, FlowReport, RunDirs, RunOptions};
use crate::state::DesignState;
use crate::step::{ExecutedStep, Step, StepId, StepInstance, StepRegistry, StepStatus};
use crate::ui::ProgressObserver;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A flow that runs a resolved list of steps in declaration order,
/// threading each step's output state into the next.
///
/// Deferred errors are recorded and execution continues; the first fatal
/// error stops the pipeline. A completed run with recorded deferred errors
/// still carries a final state but is reported as failed.
#[derive(Debug)]
pub struct SequentialFlow {
    name: String,
    pipeline: Vec<Arc<dyn Step>>,
    config: Config,
    options: RunOptions,
    ran: bool,
}

impl SequentialFlow {
    /// Build a flow from an already-resolved step-id list. Every id is
    /// looked up in the registry now; an unknown id is a configuration-time
    /// error, before any step constructs.
    pub fn new(
        name: &str,
        steps: &[StepId],
        registry: &StepRegistry,
        config: Config,
    ) -> Result<Self, FlowError> {
        let pipeline = steps
            .iter()
            .map(|id| registry.resolve(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            pipeline,
            config,
            options: RunOptions::default(),
            ran: false,
        })
    }

    /// Build a flow from a registered spec, dropping steps whose gating
    /// variables resolve to false before the stage count is published.
    pub fn from_spec(
        spec: &FlowSpec,
        registry: &StepRegistry,
        config: Config,
    ) -> Result<Self, FlowError> {
        let mut steps = Vec::new();
        'next_step: for id in &spec.steps {
            for (pattern, variables) in &spec.gates {
                if !pattern_matches(pattern, id) {
                    continue;
                }
                for variable in variables {
                    if !config.get_bool(variable)? {
                        debug!(step = %id, gate = %variable, "step gated off");
                        continue 'next_step;
                    }
                }
            }
            steps.push(id.clone());
        }
        Self::new(&spec.name, &steps, registry, config)
    }

    pub fn with_run_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// The resolved pipeline, in execution order.
    pub fn step_ids(&self) -> Vec<StepId> {
        self.pipeline.iter().map(|step| step.id()).collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait]
impl Flow for SequentialFlow {
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
        if let Err(e) = self.config.save(&run.path().join("resolved.json")) {
            warn!(error = %e, "could not persist resolved configuration");
        }

        info!(
            flow = %self.name,
            steps = self.pipeline.len(),
            run_dir = %run.path().display(),
            "starting sequential flow"
        );
        progress.set_stage_count(self.pipeline.len());

        let mut current = initial;
        let mut executed: Vec<ExecutedStep> = Vec::new();
        let mut deferred: Vec<StepError> = Vec::new();

        for (index, step) in self.pipeline.iter().enumerate() {
            let id = step.id();
            progress.stage_started(index, id.as_ref());

            let step_dir = run.next_step_dir(&id);
            let instance =
                match StepInstance::new(step.clone(), &self.config, current, step_dir) {
                    Ok(instance) => instance,
                    Err(e) => {
                        error!(step = %id, error = %e, "step validation failed");
                        executed.push(ExecutedStep {
                            id: id.clone(),
                            status: StepStatus::Failed {
                                error: e.to_string(),
                            },
                            duration: Duration::ZERO,
                        });
                        progress.stage_ended(index);
                        return Ok(FlowReport {
                            flow: self.name.clone(),
                            outcome: FlowOutcome::Aborted { error: e },
                            executed,
                            duration: started.elapsed(),
                            run_dir: run.path().to_path_buf(),
                        });
                    }
                };

            let (record, outcome) = instance.execute().await;
            progress.step_finished(&record);
            executed.push(record);
            progress.stage_ended(index);

            match outcome {
                Ok((state, errors)) => {
                    for e in &errors {
                        warn!(step = %id, error = %e, "deferred error recorded");
                    }
                    deferred.extend(errors);
                    current = state;
                }
                Err(e) => {
                    error!(step = %id, error = %e, "fatal error, stopping flow");
                    return Ok(FlowReport {
                        flow: self.name.clone(),
                        outcome: FlowOutcome::Aborted { error: e },
                        executed,
                        duration: started.elapsed(),
                        run_dir: run.path().to_path_buf(),
                    });
                }
            }
        }

        if let Err(e) = current.save(&run.path().join("state.json")) {
            warn!(error = %e, "could not persist final state");
        }

        let outcome = if deferred.is_empty() {
            info!(flow = %self.name, "flow completed cleanly");
            FlowOutcome::Completed { state: current }
        } else {
            warn!(
                flow = %self.name,
                count = deferred.len(),
                "flow completed with deferred errors"
            );
            FlowOutcome::CompletedWithDeferred {
                state: current,
                errors: deferred,
            }
        };

        Ok(FlowReport {
            flow: self.name.clone(),
            outcome,
            executed,
            duration: started.elapsed(),
            run_dir: run.path().to_path_buf(),
        })
    }
}

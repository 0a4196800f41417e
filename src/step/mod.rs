//! The step execution contract.
//!
//! A [`Step`] is a single schedulable unit wrapping one external-tool
//! invocation. Implementations declare the configuration variables they
//! consume and the state views they read and produce; the orchestrator
//! validates both before any external work begins.
//!
//! Execution goes through a [`StepInstance`], created once per execution
//! and never reused: construction binds the configuration and validates the
//! declared variables (fail fast), [`StepInstance::execute`] performs the
//! invocation and yields either a new state, a new state plus deferred
//! errors, or a fatal error.

mod id;
mod registry;

pub use id::StepId;
pub use registry::StepRegistry;

use crate::config::{Config, Variable};
use crate::errors::StepError;
use crate::state::{DesignFormat, DesignState, MetricsUpdate, ViewsUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A single schedulable unit wrapping one external-tool invocation.
///
/// Implementations are stateless behavior objects shared through the
/// registry; all per-execution state lives in the [`StepContext`].
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable dotted identifier, e.g. `OpenROAD.Floorplan`.
    fn id(&self) -> StepId;

    /// The configuration variables this step consumes. Validated against
    /// the bound configuration at instance construction.
    fn config_variables(&self) -> Vec<Variable> {
        Vec::new()
    }

    /// Views that must be present in the input state.
    fn input_views(&self) -> Vec<DesignFormat> {
        Vec::new()
    }

    /// Views this step produces. Each must appear in the returned
    /// [`StepOutput`]; a missing one is a step fault.
    fn output_views(&self) -> Vec<DesignFormat> {
        Vec::new()
    }

    /// Perform the external invocation. Opaque to the orchestrator.
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Step").field(&self.id()).finish()
    }
}

/// Everything a running step may touch: the shared read-only configuration,
/// the input snapshot, and the step's own isolated working directory.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub config: Config,
    pub state_in: DesignState,
    pub step_dir: PathBuf,
}

/// What a step execution produced.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub views: ViewsUpdate,
    pub metrics: MetricsUpdate,
    /// Non-fatal problems recorded alongside a (possibly partial) result.
    pub deferred: Vec<StepError>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(mut self, format: DesignFormat, path: impl Into<PathBuf>) -> Self {
        self.views.insert(format, path.into());
        self
    }

    pub fn with_metric(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    /// Record a deferred error without failing the step.
    pub fn defer(&mut self, step: &StepId, message: impl Into<String>) {
        self.deferred.push(StepError::deferred(step, message));
    }
}

/// Terminal disposition of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step produced a new state.
    Succeeded,
    /// The step produced a new state but recorded non-fatal errors.
    DeferredFailed { error: String },
    /// The step produced no usable state.
    Failed { error: String },
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::DeferredFailed { error } | Self::Failed { error } => Some(error),
        }
    }
}

/// Record of one executed step, as reported in the flow result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub id: StepId,
    pub status: StepStatus,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// A step bound to its configuration, input state and working directory,
/// validated and ready to run exactly once.
#[derive(Debug)]
pub struct StepInstance {
    step: Arc<dyn Step>,
    config: Config,
    state_in: DesignState,
    step_dir: PathBuf,
}

impl StepInstance {
    /// Bind `step` to `config` and `state_in`, checking every declared
    /// consumed variable for presence and type validity. Fails before any
    /// external work.
    pub fn new(
        step: Arc<dyn Step>,
        config: &Config,
        state_in: DesignState,
        step_dir: PathBuf,
    ) -> Result<Self, StepError> {
        let id = step.id();
        for var in step.config_variables() {
            match config.get(&var.name) {
                Some(value) => {
                    var.kind.check(&var.name, value.clone()).map_err(|e| {
                        StepError::fault(&id, format!("consumed variable is invalid: {e}"))
                    })?;
                }
                None if var.required || var.default.is_some() => {
                    return Err(StepError::fault(
                        &id,
                        format!("consumed variable '{}' is not in the configuration", var.name),
                    ));
                }
                None => {}
            }
        }
        Ok(Self {
            step,
            config: config.clone(),
            state_in,
            step_dir,
        })
    }

    pub fn id(&self) -> StepId {
        self.step.id()
    }

    /// Run the step against the bound input state. Consumes the instance;
    /// a step instance is never re-run.
    ///
    /// Returns the execution record plus either the output state with any
    /// deferred errors, or the fatal error that stopped the chain.
    pub async fn execute(
        self,
    ) -> (ExecutedStep, Result<(DesignState, Vec<StepError>), StepError>) {
        let id = self.step.id();
        let started = Instant::now();

        let outcome = self.execute_inner().await;
        let duration = started.elapsed();

        let record = ExecutedStep {
            id: id.clone(),
            status: match &outcome {
                Ok((_, deferred)) if deferred.is_empty() => StepStatus::Succeeded,
                Ok((_, deferred)) => StepStatus::DeferredFailed {
                    error: deferred
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; "),
                },
                Err(error) => StepStatus::Failed {
                    error: error.to_string(),
                },
            },
            duration,
        };
        debug!(step = %id, status = ?record.status, "step finished");
        (record, outcome)
    }

    async fn execute_inner(&self) -> Result<(DesignState, Vec<StepError>), StepError> {
        let id = self.step.id();
        let state_in = self.state_in.clone();

        state_in.require_views(&id, &self.step.input_views())?;

        std::fs::create_dir_all(&self.step_dir).map_err(|e| {
            StepError::tool(
                &id,
                format!(
                    "failed to create step directory {}: {e}",
                    self.step_dir.display()
                ),
            )
        })?;

        let ctx = StepContext {
            config: self.config.clone(),
            state_in: state_in.clone(),
            step_dir: self.step_dir.clone(),
        };

        match self.step.run(&ctx).await {
            Ok(output) => {
                for view in self.step.output_views() {
                    if !output.views.contains_key(&view) {
                        return Err(StepError::fault(
                            &id,
                            format!("declared output view '{view}' was not produced"),
                        ));
                    }
                }
                let state_out = state_in.with_updates(output.views, output.metrics);
                if let Err(e) = state_out.save(&self.step_dir.join("state_out.json")) {
                    warn!(step = %id, error = %e, "could not persist step output state");
                }
                Ok((state_out, output.deferred))
            }
            // A bare deferred error threads the input state through unchanged.
            Err(e @ StepError::Deferred { .. }) => Ok((state_in, vec![e])),
            Err(e) => Err(e),
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, VariableKind};

    struct FakeSynthesis;

    #[async_trait]
    impl Step for FakeSynthesis {
        fn id(&self) -> StepId {
            "Fake.Synthesis".parse().unwrap()
        }

        fn config_variables(&self) -> Vec<Variable> {
            vec![Variable::new(
                "DESIGN_NAME",
                VariableKind::String,
                "top module name",
            )]
        }

        fn output_views(&self) -> Vec<DesignFormat> {
            vec![DesignFormat::Netlist]
        }

        async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
            let name = ctx.config.get_str("DESIGN_NAME").unwrap();
            Ok(StepOutput::new()
                .with_view(DesignFormat::Netlist, format!("{name}.nl.v"))
                .with_metric("synthesis__cell_count", 42))
        }
    }

    struct MissingOutput;

    #[async_trait]
    impl Step for MissingOutput {
        fn id(&self) -> StepId {
            "Fake.MissingOutput".parse().unwrap()
        }

        fn output_views(&self) -> Vec<DesignFormat> {
            vec![DesignFormat::Def]
        }

        async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
            Ok(StepOutput::new())
        }
    }

    fn config() -> Config {
        let doc = ConfigSource::new("doc").with("DESIGN_NAME", "cpu");
        Config::resolve(
            &[doc],
            vec![Variable::new("DESIGN_NAME", VariableKind::String, "")],
        )
        .unwrap()
    }

    fn step_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let step_dir = dir.path().join("01-fake-synthesis");
        (dir, step_dir)
    }

    #[tokio::test]
    async fn test_successful_execution_produces_new_state() {
        let (_guard, step_dir) = step_dir();
        let instance =
            StepInstance::new(Arc::new(FakeSynthesis), &config(), DesignState::new(), step_dir)
                .unwrap();
        let (record, outcome) = instance.execute().await;

        let (state, deferred) = outcome.unwrap();
        assert_eq!(record.status, StepStatus::Succeeded);
        assert!(deferred.is_empty());
        assert!(state.view(DesignFormat::Netlist).is_some());
        assert_eq!(
            state.metric("synthesis__cell_count"),
            Some(&serde_json::json!(42))
        );
    }

    #[tokio::test]
    async fn test_execution_persists_output_state() {
        let (_guard, step_dir) = step_dir();
        let instance = StepInstance::new(
            Arc::new(FakeSynthesis),
            &config(),
            DesignState::new(),
            step_dir.clone(),
        )
        .unwrap();
        let (_, outcome) = instance.execute().await;
        let (state, _) = outcome.unwrap();

        let persisted = DesignState::load(&step_dir.join("state_out.json")).unwrap();
        assert_eq!(persisted, state);
    }

    #[test]
    fn test_construction_fails_fast_on_missing_variable() {
        let (_guard, step_dir) = step_dir();
        let empty = Config::resolve(&[], vec![]).unwrap();
        let err =
            StepInstance::new(Arc::new(FakeSynthesis), &empty, DesignState::new(), step_dir)
                .unwrap_err();
        assert!(matches!(err, StepError::Fault { .. }));
        assert!(err.to_string().contains("DESIGN_NAME"));
    }

    #[tokio::test]
    async fn test_missing_input_view_is_fault() {
        struct NeedsNetlist;

        #[async_trait]
        impl Step for NeedsNetlist {
            fn id(&self) -> StepId {
                "Fake.Floorplan".parse().unwrap()
            }

            fn input_views(&self) -> Vec<DesignFormat> {
                vec![DesignFormat::Netlist]
            }

            async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
                Ok(StepOutput::new())
            }
        }

        let (_guard, step_dir) = step_dir();
        let instance =
            StepInstance::new(Arc::new(NeedsNetlist), &config(), DesignState::new(), step_dir)
                .unwrap();
        let (record, outcome) = instance.execute().await;

        assert!(matches!(outcome, Err(StepError::Fault { .. })));
        assert!(matches!(record.status, StepStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_undeclared_output_is_fault() {
        let (_guard, step_dir) = step_dir();
        let instance =
            StepInstance::new(Arc::new(MissingOutput), &config(), DesignState::new(), step_dir)
                .unwrap();
        let (_, outcome) = instance.execute().await;

        let err = outcome.unwrap_err();
        assert!(matches!(err, StepError::Fault { .. }));
        assert!(err.to_string().contains("def"));
    }

    #[tokio::test]
    async fn test_deferred_error_threads_state_through() {
        struct SoftChecker;

        #[async_trait]
        impl Step for SoftChecker {
            fn id(&self) -> StepId {
                "Fake.Checker".parse().unwrap()
            }

            async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
                Err(StepError::deferred(
                    &"Fake.Checker".parse().unwrap(),
                    "utilization high",
                ))
            }
        }

        let (_guard, step_dir) = step_dir();
        let input = DesignState::new().with_view(DesignFormat::Netlist, "cpu.nl.v");
        let instance =
            StepInstance::new(Arc::new(SoftChecker), &config(), input.clone(), step_dir).unwrap();
        let (record, outcome) = instance.execute().await;

        let (state, deferred) = outcome.unwrap();
        assert_eq!(state, input);
        assert_eq!(deferred.len(), 1);
        assert!(matches!(record.status, StepStatus::DeferredFailed { .. }));
    }
}

//! Typed error hierarchy for the tapeout orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `ConfigError` — configuration resolution and override failures
//! - `StepError` — per-step execution failures, tagged with a severity
//! - `FlowError` — pipeline resolution and flow infrastructure failures
//!
//! Severity drives scheduling: a `Deferred` error is accumulated and the
//! flow keeps going; anything `Fatal` or above stops the dependency chain
//! that contains the step.

use crate::step::StepId;
use std::path::PathBuf;
use thiserror::Error;

/// How bad a step failure is, in escalating order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The flow may continue; the error is surfaced once the flow completes.
    Deferred,
    /// The dependency chain containing the step must stop.
    Fatal,
    /// The step implementation itself malfunctioned. Never deferrable.
    Critical,
}

/// Errors raised by a single step execution.
///
/// Cloneable so that a failure on a shared upstream step can be surfaced
/// identically to every downstream resolver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// The external invocation failed or its input data is invalid.
    #[error("[{step}] {message}")]
    Tool { step: StepId, message: String },

    /// A soft violation that should not stop the pipeline.
    #[error("[{step}] deferred: {message}")]
    Deferred { step: StepId, message: String },

    /// The step implementation malfunctioned: it produced an invalid state,
    /// or was handed a state missing a required view.
    #[error("[{step}] step fault: {message}")]
    Fault { step: StepId, message: String },
}

impl StepError {
    /// A fatal tool/input error.
    pub fn tool(step: &StepId, message: impl Into<String>) -> Self {
        Self::Tool {
            step: step.clone(),
            message: message.into(),
        }
    }

    /// A non-fatal error, recorded and reported at flow completion.
    pub fn deferred(step: &StepId, message: impl Into<String>) -> Self {
        Self::Deferred {
            step: step.clone(),
            message: message.into(),
        }
    }

    /// A step-object malfunction. Always fatal.
    pub fn fault(step: &StepId, message: impl Into<String>) -> Self {
        Self::Fault {
            step: step.clone(),
            message: message.into(),
        }
    }

    /// The step that raised this error.
    pub fn step(&self) -> &StepId {
        match self {
            Self::Tool { step, .. } | Self::Deferred { step, .. } | Self::Fault { step, .. } => {
                step
            }
        }
    }

    /// The severity class of this error.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Deferred { .. } => Severity::Deferred,
            Self::Tool { .. } => Severity::Fatal,
            Self::Fault { .. } => Severity::Critical,
        }
    }

    /// Whether this error stops the dependency chain.
    pub fn is_fatal(&self) -> bool {
        self.severity() >= Severity::Fatal
    }
}

/// Errors from configuration resolution and derivation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("required variable '{variable}' has no value in any source")]
    Missing { variable: String },

    #[error("variable '{variable}': expected {expected}, got {received}")]
    TypeMismatch {
        variable: String,
        expected: String,
        received: String,
    },

    #[error("variable '{variable}': {message}")]
    Constraint { variable: String, message: String },

    #[error("'{variable}' is not a declared variable")]
    Unknown { variable: String },
}

/// Configuration-time and infrastructure errors from the flow layer.
///
/// Everything here is raised before or outside step execution; failures of
/// the steps themselves travel as [`StepError`] inside the flow report.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no step registered under id '{id}'")]
    UnknownStep { id: String },

    #[error("no flow registered under name '{name}'")]
    UnknownFlow { name: String },

    #[error("invalid step id '{id}': {reason}")]
    InvalidStepId { id: String, reason: String },

    #[error("step '{id}' is already registered")]
    DuplicateStep { id: String },

    #[error("flow '{name}' is already registered")]
    DuplicateFlow { name: String },

    #[error("unsupported pipeline schema version {version} (expected {expected})")]
    UnsupportedVersion { version: u64, expected: u64 },

    #[error("substitution target '{target}': {reason}")]
    InvalidSubstitution { target: String, reason: String },

    #[error("unknown design view '{view}'")]
    UnknownView { view: String },

    #[error("flow instances are single-use; this flow has already run")]
    AlreadyRan,

    #[error("failed to create run directory {path}: {source}")]
    RunDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StepId {
        s.parse().unwrap()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Deferred < Severity::Fatal);
        assert!(Severity::Fatal < Severity::Critical);
    }

    #[test]
    fn test_step_error_severities() {
        let step = id("Yosys.Synthesis");
        assert_eq!(
            StepError::tool(&step, "exit code 1").severity(),
            Severity::Fatal
        );
        assert_eq!(
            StepError::deferred(&step, "utilization high").severity(),
            Severity::Deferred
        );
        assert_eq!(
            StepError::fault(&step, "missing view").severity(),
            Severity::Critical
        );
    }

    #[test]
    fn test_deferred_is_not_fatal() {
        let step = id("Checker.WireLength");
        assert!(!StepError::deferred(&step, "over budget").is_fatal());
        assert!(StepError::tool(&step, "bad input").is_fatal());
        assert!(StepError::fault(&step, "bug").is_fatal());
    }

    #[test]
    fn test_step_error_names_step() {
        let step = id("OpenROAD.Floorplan");
        let err = StepError::tool(&step, "died");
        assert_eq!(err.step(), &step);
        assert!(err.to_string().contains("OpenROAD.Floorplan"));
    }

    #[test]
    fn test_config_error_messages_name_variable() {
        let err = ConfigError::Missing {
            variable: "CLOCK_PERIOD".into(),
        };
        assert!(err.to_string().contains("CLOCK_PERIOD"));

        let err = ConfigError::TypeMismatch {
            variable: "CORE_UTIL".into(),
            expected: "float".into(),
            received: "\"high\"".into(),
        };
        assert!(err.to_string().contains("float"));
        assert!(err.to_string().contains("high"));
    }

    #[test]
    fn test_flow_error_from_config_error() {
        let err: FlowError = ConfigError::Unknown {
            variable: "X".into(),
        }
        .into();
        assert!(matches!(err, FlowError::Config(_)));
    }
}

//! A step that runs one configured external command.
//!
//! The command executes inside the step's isolated working directory with
//! the step's contract exported through the environment:
//!
//! - `STEP_DIR` — the working directory
//! - `DESIGN_NAME` — always exported
//! - one variable per declared consumed configuration variable
//! - `IN_<VIEW>` — absolute path of each declared input view
//!
//! Declared output views are collected from `<STEP_DIR>/<DESIGN_NAME>.<ext>`
//! after the command exits. Lines on stdout of the form
//! `%METRIC <name> <value>` become metrics updates. A nonzero exit is a
//! fatal tool error unless the code is listed in `deferred_exit_codes`, in
//! which case the step completes with a recorded deferred error.

use crate::config::{Variable, VariableKind};
use crate::errors::{FlowError, StepError};
use crate::state::DesignFormat;
use crate::step::{Step, StepContext, StepId, StepOutput};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// Generic external-command step.
pub struct CommandStep {
    id: StepId,
    command: Vec<String>,
    inputs: Vec<DesignFormat>,
    outputs: Vec<DesignFormat>,
    variables: Vec<Variable>,
    deferred_exit_codes: Vec<i32>,
}

impl CommandStep {
    pub fn new(id: &str, command: &[&str]) -> Result<Self, FlowError> {
        Ok(Self {
            id: StepId::parse(id)?,
            command: command.iter().map(|s| s.to_string()).collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            variables: Vec::new(),
            deferred_exit_codes: Vec::new(),
        })
    }

    pub fn with_inputs(mut self, inputs: &[DesignFormat]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    pub fn with_outputs(mut self, outputs: &[DesignFormat]) -> Self {
        self.outputs = outputs.to_vec();
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_deferred_exit_codes(mut self, codes: &[i32]) -> Self {
        self.deferred_exit_codes = codes.to_vec();
        self
    }
}

#[async_trait]
impl Step for CommandStep {
    fn id(&self) -> StepId {
        self.id.clone()
    }

    fn config_variables(&self) -> Vec<Variable> {
        let mut variables = self.variables.clone();
        if !variables.iter().any(|v| v.name == "DESIGN_NAME") {
            variables.push(Variable::new(
                "DESIGN_NAME",
                VariableKind::String,
                "Name of the design's top-level module.",
            ));
        }
        variables
    }

    fn input_views(&self) -> Vec<DesignFormat> {
        self.inputs.clone()
    }

    fn output_views(&self) -> Vec<DesignFormat> {
        self.outputs.clone()
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let id = self.id.clone();
        let design = ctx
            .config
            .get_str("DESIGN_NAME")
            .map_err(|e| StepError::fault(&id, e.to_string()))?
            .to_string();

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| StepError::fault(&id, "command line is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.current_dir(&ctx.step_dir);
        cmd.env("STEP_DIR", &ctx.step_dir);
        cmd.env("DESIGN_NAME", &design);
        for var in &self.variables {
            if let Some(value) = ctx.config.get(&var.name) {
                cmd.env(&var.name, value.to_string());
            }
        }
        for view in &self.inputs {
            let path = ctx.state_in.view(*view).ok_or_else(|| {
                StepError::fault(&id, format!("input view '{view}' disappeared"))
            })?;
            let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            cmd.env(format!("IN_{}", view.id().to_uppercase()), path);
        }

        debug!(step = %id, program = %program, "invoking external command");
        let output = cmd.output().await.map_err(|e| {
            StepError::tool(&id, format!("failed to spawn '{program}': {e}"))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Err(e) =
            std::fs::write(ctx.step_dir.join("cmd.log"), format!("{stdout}{stderr}"))
        {
            warn!(step = %id, error = %e, "could not write command log");
        }

        let mut result = StepOutput::new();
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("%METRIC ")
                && let Some((name, raw)) = rest.trim().split_once(' ')
            {
                let value = serde_json::from_str(raw.trim())
                    .unwrap_or_else(|_| serde_json::Value::String(raw.trim().to_string()));
                result.metrics.insert(name.to_string(), value);
            }
        }

        match output.status.code() {
            Some(0) => {}
            Some(code) if self.deferred_exit_codes.contains(&code) => {
                result.defer(&id, format!("command exited with deferred code {code}"));
            }
            Some(code) => {
                let detail = stderr
                    .lines()
                    .last()
                    .map(|line| format!(": {line}"))
                    .unwrap_or_default();
                return Err(StepError::tool(
                    &id,
                    format!("command exited with code {code}{detail}"),
                ));
            }
            None => {
                return Err(StepError::tool(&id, "command terminated by signal"));
            }
        }

        for view in &self.outputs {
            let path = ctx.step_dir.join(format!("{design}.{}", view.extension()));
            if !path.exists() {
                return Err(StepError::tool(
                    &id,
                    format!(
                        "expected output view '{view}' at {} was not produced",
                        path.display()
                    ),
                ));
            }
            result.views.insert(*view, path);
        }

        Ok(result)
    }
}

/// Declarative form of a [`CommandStep`], as it appears in the `[[steps]]`
/// array of a pipeline document.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandStepSpec {
    pub id: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<Variable>,
    #[serde(default)]
    pub deferred_exit_codes: Vec<i32>,
}

impl CommandStepSpec {
    pub fn into_step(self) -> Result<CommandStep, FlowError> {
        let views = |ids: Vec<String>| -> Result<Vec<DesignFormat>, FlowError> {
            ids.into_iter()
                .map(|v| {
                    DesignFormat::from_id(&v)
                        .ok_or_else(|| FlowError::UnknownView { view: v.clone() })
                })
                .collect()
        };
        Ok(CommandStep {
            id: StepId::parse(&self.id)?,
            command: self.command,
            inputs: views(self.inputs)?,
            outputs: views(self.outputs)?,
            variables: self.consumes,
            deferred_exit_codes: self.deferred_exit_codes,
        })
    }
}

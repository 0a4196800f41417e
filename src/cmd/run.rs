//! Pipeline execution — `tapeout run` and `tapeout check`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::Cli;
use tapeout::config::{Config, ConfigSource, Value};
use tapeout::flow::{
    Flow, FlowOutcome, FlowReport, FlowRegistry, FlowSpec, PipelineDoc, RunOptions,
    SequentialFlow, collect_variables, resolve_pipeline,
};
use tapeout::state::DesignState;
use tapeout::step::{Step, StepId, StepRegistry};
use tapeout::ui::FlowProgress;

/// Everything derived from the pipeline document and the CLI sources,
/// ready for flow construction.
pub(crate) struct Prepared {
    pub registry: StepRegistry,
    pub step_ids: Vec<StepId>,
    pub flow_spec: Option<FlowSpec>,
    pub config: Config,
}

fn parse_override(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("override '{raw}' is not of the form VAR=VALUE"))?;
    Ok((name.to_string(), Value::from_raw(value)))
}

fn environment_source() -> ConfigSource {
    let mut source = ConfigSource::new("environment");
    for (key, value) in std::env::vars() {
        if let Some(name) = key.strip_prefix("TAPEOUT_VAR_") {
            source.values.insert(name.to_string(), Value::from_raw(&value));
        }
    }
    source
}

fn pdk_source(path: Option<&Path>) -> Result<ConfigSource> {
    let Some(path) = path else {
        return Ok(ConfigSource::new("pdk"));
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read PDK document {}", path.display()))?;
    let values = toml::from_str(&text)
        .with_context(|| format!("failed to parse PDK document {}", path.display()))?;
    Ok(ConfigSource::from_map("pdk", values))
}

/// Load the document, build the registries, resolve the pipeline and the
/// configuration. Shared by `run` and `check`.
pub(crate) fn prepare(cli: &Cli) -> Result<Prepared> {
    let doc = PipelineDoc::load(&cli.config)?;

    let mut registry = StepRegistry::new();
    for spec in &doc.steps {
        registry.register(Arc::new(spec.clone().into_step()?))?;
    }
    let mut flows = FlowRegistry::new();
    for spec in &doc.flows {
        flows.register(spec.clone())?;
    }

    let (step_ids, flow_spec) = resolve_pipeline(&doc.meta, &flows)?;
    let flow_spec = flow_spec.cloned();

    let pipeline: Vec<Arc<dyn Step>> = step_ids
        .iter()
        .map(|id| registry.resolve(id))
        .collect::<Result<_, _>>()?;
    let flow_variables = flow_spec
        .as_ref()
        .map(|spec| spec.variables.as_slice())
        .unwrap_or(&[]);
    let schema = collect_variables(flow_variables, &pipeline);

    let mut overrides = ConfigSource::new("overrides");
    for raw in &cli.overrides {
        let (name, value) = parse_override(raw)?;
        overrides.values.insert(name, value);
    }
    let document = ConfigSource::from_map("config document", doc.variables.clone());
    let sources = [
        overrides,
        document,
        environment_source(),
        pdk_source(cli.pdk.as_deref())?,
    ];
    let config = Config::resolve(&sources, schema)?;

    Ok(Prepared {
        registry,
        step_ids,
        flow_spec,
        config,
    })
}

/// Construct the sequential flow for a prepared pipeline, applying gating
/// when the base was a registered flow spec.
fn build_flow(prepared: &Prepared) -> Result<SequentialFlow> {
    let flow = match &prepared.flow_spec {
        Some(spec) => {
            // Substitutions may have edited the step list; gating patterns
            // still apply to whatever survived.
            let spec = FlowSpec {
                steps: prepared.step_ids.clone(),
                ..spec.clone()
            };
            SequentialFlow::from_spec(&spec, &prepared.registry, prepared.config.clone())?
        }
        None => SequentialFlow::new(
            "custom",
            &prepared.step_ids,
            &prepared.registry,
            prepared.config.clone(),
        )?,
    };
    Ok(flow)
}

pub async fn cmd_run(cli: &Cli, tag: Option<String>, run_dir: PathBuf) -> Result<ExitCode> {
    let prepared = prepare(cli)?;

    let mut options = RunOptions::default().with_base_dir(run_dir);
    if let Some(tag) = tag {
        options = options.with_tag(&tag);
    }
    let mut flow = build_flow(&prepared)?.with_run_options(options);

    println!(
        "{} {} ({} steps)",
        style("Running flow").bold(),
        style(flow.name()).cyan(),
        flow.step_ids().len()
    );

    let progress = Arc::new(FlowProgress::new());
    let report = flow.run(DesignState::new(), progress.clone()).await?;
    progress.finish();

    print_report(&report);

    Ok(match &report.outcome {
        FlowOutcome::Completed { .. } => ExitCode::SUCCESS,
        FlowOutcome::CompletedWithDeferred { .. } => ExitCode::from(2),
        FlowOutcome::Aborted { .. } => ExitCode::FAILURE,
    })
}

pub fn cmd_check(cli: &Cli) -> Result<()> {
    let prepared = prepare(cli)?;
    let flow = build_flow(&prepared)?;

    println!("{}", style("Pipeline").bold());
    for (index, id) in flow.step_ids().iter().enumerate() {
        println!("  {:>2}. {id}", index + 1);
    }

    println!();
    println!("{}", style("Resolved configuration").bold());
    for (name, value) in prepared.config.iter() {
        println!("  {name} = {value}");
    }
    Ok(())
}

fn print_report(report: &FlowReport) {
    println!();
    match &report.outcome {
        FlowOutcome::Completed { .. } => {
            println!(
                "{} flow '{}' completed in {:.1}s",
                style("✓").green().bold(),
                report.flow,
                report.duration.as_secs_f64()
            );
        }
        FlowOutcome::CompletedWithDeferred { errors, .. } => {
            println!(
                "{} flow '{}' completed with {} deferred error(s)",
                style("!").yellow().bold(),
                report.flow,
                errors.len()
            );
            for error in errors {
                println!("    {} {error}", style("!").yellow());
            }
        }
        FlowOutcome::Aborted { error } => {
            println!(
                "{} flow '{}' aborted: {error}",
                style("✗").red().bold(),
                report.flow
            );
        }
    }
    println!(
        "  {} step(s) executed, run directory {}",
        report.executed.len(),
        report.run_dir.display()
    );
}

//! Introspection — `tapeout steps` and `tapeout flows`.

use anyhow::Result;
use console::style;

use crate::Cli;
use tapeout::flow::PipelineDoc;
use tapeout::step::Step;

pub fn cmd_steps(cli: &Cli) -> Result<()> {
    let doc = PipelineDoc::load(&cli.config)?;
    if doc.steps.is_empty() {
        println!("No steps registered by {}", cli.config.display());
        return Ok(());
    }
    println!("{}", style("Registered steps").bold());
    for spec in &doc.steps {
        let step = spec.clone().into_step()?;
        let outputs: Vec<String> = step
            .output_views()
            .iter()
            .map(|v| v.to_string())
            .collect();
        if outputs.is_empty() {
            println!("  {}", step.id());
        } else {
            println!(
                "  {} {} {}",
                step.id(),
                style("->").dim(),
                outputs.join(", ")
            );
        }
    }
    Ok(())
}

pub fn cmd_flows(cli: &Cli) -> Result<()> {
    let doc = PipelineDoc::load(&cli.config)?;
    if doc.flows.is_empty() {
        println!("No flows registered by {}", cli.config.display());
        return Ok(());
    }
    println!("{}", style("Registered flows").bold());
    for spec in &doc.flows {
        println!(
            "  {} ({} steps, {} gated)",
            style(&spec.name).cyan(),
            spec.steps.len(),
            spec.gates.len()
        );
    }
    Ok(())
}

//! Stage progress observation, rendered via `indicatif`.

use crate::step::{ExecutedStep, StepStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Receives stage-count and stage lifecycle notifications from a running
/// flow. Purely observational: implementations have no control influence.
///
/// A sequential flow emits one stage per step; a programmable flow's
/// script brackets logically-related groups of launches itself, so many
/// steps may share one stage.
pub trait ProgressObserver: Send + Sync {
    fn set_stage_count(&self, _total: usize) {}

    fn stage_started(&self, _index: usize, _name: &str) {}

    fn stage_ended(&self, _index: usize) {}

    /// Called once per completed step instance, in completion order.
    fn step_finished(&self, _record: &ExecutedStep) {}
}

/// Observer that ignores everything. For headless and library use.
pub struct NullProgress;

impl ProgressObserver for NullProgress {}

/// Terminal progress bar for a running flow.
pub struct FlowProgress {
    bar: ProgressBar,
}

impl FlowProgress {
    pub fn new() -> Self {
        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let bar = ProgressBar::new(0);
        bar.set_style(bar_style);
        bar.set_prefix("Stages");
        Self { bar }
    }

    /// Print a line above the bar without disturbing it.
    fn print_line(&self, msg: impl AsRef<str>) {
        self.bar.println(msg.as_ref());
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for FlowProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for FlowProgress {
    fn set_stage_count(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn stage_started(&self, _index: usize, name: &str) {
        self.bar.set_message(format!("{}", style(name).yellow()));
    }

    fn stage_ended(&self, _index: usize) {
        self.bar.inc(1);
    }

    fn step_finished(&self, record: &ExecutedStep) {
        let secs = record.duration.as_secs_f64();
        match &record.status {
            StepStatus::Succeeded => self.print_line(format!(
                "  {} {} ({secs:.1}s)",
                style("✓").green(),
                record.id
            )),
            StepStatus::DeferredFailed { error } => self.print_line(format!(
                "  {} {} ({secs:.1}s): {}",
                style("!").yellow().bold(),
                record.id,
                style(error).yellow()
            )),
            StepStatus::Failed { error } => self.print_line(format!(
                "  {} {} ({secs:.1}s): {}",
                style("✗").red().bold(),
                record.id,
                style(error).red()
            )),
        }
    }
}

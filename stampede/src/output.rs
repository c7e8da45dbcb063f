use std::path::Path;

use stampede_core::{ProgressFn, RunOptions, RunReport};

use crate::cli::OutputFormat;

mod human;
mod json;

/// What is about to run, printed before the first tick.
pub(crate) struct RunPlan<'a> {
    pub name: &'a str,
    pub path: &'a Path,
    pub options: &'a RunOptions,
    pub requests: Vec<(&'a str, &'a str)>,
}

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan: &RunPlan<'_>);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, name: &str, report: &RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

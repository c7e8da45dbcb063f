use std::sync::Arc;

use stampede_core::{ProgressFn, ProgressUpdate, RunReport};

mod format;
mod progress;
mod summary;

use format::format_duration;
use progress::HumanProgress;
use summary::render;

use super::{OutputFormatter, RunPlan};

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn progress_message(u: &ProgressUpdate) -> String {
    format!(
        "stage={}/{} target={} vus={} iters={} elapsed={} stage_remaining={}",
        u.stage.index + 1,
        u.stage.count,
        u.target_vus,
        u.active_vus,
        u.iterations,
        format_duration(u.elapsed),
        format_duration(u.stage.stage_remaining)
    )
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan: &RunPlan<'_>) {
        println!("scenario: {} ({})", plan.name, plan.path.display());
        println!(
            "stages: {} total={} start_vus={} graceful_stop={}",
            plan.options.stages.len(),
            format_duration(plan.options.total_duration()),
            plan.options.start_vus,
            format_duration(plan.options.grace_period)
        );
        for stage in &plan.options.stages {
            println!(
                "  -> {} vus over {}",
                stage.target,
                format_duration(stage.duration)
            );
        }
        for (name, url) in &plan.requests {
            println!("request: {name} {url}");
        }
        for t in &plan.options.thresholds {
            let abort = if t.abort_on_fail { " (abort on fail)" } else { "" };
            println!("threshold: {}: {}{abort}", t.metric, t.expression);
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u: ProgressUpdate| {
            progress.update("run", u.total_duration, u.elapsed, progress_message(&u));
        }))
    }

    fn print_summary(&self, name: &str, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(name, report));

        let failed: Vec<_> = report.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no data)", t.metric, t.expression),
                }
            }
        }
        if let Some(err) = &report.teardown_error {
            eprintln!("teardown failed: {err}");
        }
        if report.iterations == 0 {
            eprintln!("warning: no iterations completed");
        }

        Ok(())
    }
}

use stampede_core::{
    BuiltinMetrics, RunOptions, RunReport, Runner, StageScheduler, parse_thresholds,
};
use stampede_metrics::Registry;

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::http_scenario::HttpScenario;
use crate::output::{self, RunPlan};
use crate::run_error::RunError;
use crate::scenario_yaml::ScenarioFile;

fn load_error(err: anyhow::Error) -> RunError {
    RunError::InvalidInput(err)
}

/// Checks everything the engine would reject at start-up, without sending traffic.
fn preflight(options: &RunOptions) -> Result<(), RunError> {
    options.validate()?;
    StageScheduler::new(options.start_vus, options.stages.clone())?;
    let registry = Registry::default();
    BuiltinMetrics::register(&registry)?;
    parse_thresholds(&options.thresholds, &registry)?;
    Ok(())
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let file = ScenarioFile::load(&args.scenario).await.map_err(load_error)?;
    let scenario =
        HttpScenario::from_file(&file, args.base_url.as_deref()).map_err(load_error)?;

    let mut options = file.run_options();
    if let Some(start_vus) = args.start_vus {
        options = options.with_start_vus(start_vus);
    }
    if let Some(grace) = args.graceful_stop {
        options = options.with_grace_period(grace);
    }
    if let Some(tick) = args.tick_interval {
        options = options.with_tick_interval(tick);
    }
    preflight(&options)?;

    let name = file.display_name(&args.scenario).into_owned();
    let out = output::formatter(args.output);
    out.print_header(&RunPlan {
        name: &name,
        path: &args.scenario,
        options: &options,
        requests: scenario.urls().collect(),
    });

    let mut runner = Runner::new(scenario, options);
    if let Some(progress) = out.progress() {
        runner = runner.with_progress(progress);
    }
    let cancel = runner.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping virtual users");
            cancel.cancel();
        }
    });

    let report = runner.run().await;
    ctrl_c.abort();
    let report = report?;

    out.print_summary(&name, &report)
        .map_err(RunError::RuntimeError)?;
    exit_code(&report)
}

fn exit_code(report: &RunReport) -> Result<ExitCode, RunError> {
    if let Some(err) = &report.teardown_error {
        return Err(stampede_core::Error::Teardown(err.clone()).into());
    }
    Ok(ExitCode::from_status(report.status))
}

pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let file = ScenarioFile::load(&args.scenario).await.map_err(load_error)?;
    let scenario =
        HttpScenario::from_file(&file, args.base_url.as_deref()).map_err(load_error)?;
    let options = file.run_options();
    preflight(&options)?;

    println!(
        "{}: ok ({} stages, {} thresholds, {} requests, total {})",
        args.scenario.display(),
        options.stages.len(),
        options.thresholds.len(),
        scenario.urls().count(),
        humantime::format_duration(options.total_duration())
    );
    Ok(ExitCode::Success)
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    humantime::parse_duration(input.trim())
        .map_err(|err| format!("invalid duration '{input}' (expected e.g. 10s, 250ms, 1m): {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a readable summary on stdout.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary line to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Stage-based HTTP load generator",
    long_about = "stampede ramps virtual users along a staged timeline, sends the requests listed in a YAML scenario file, and judges the run against thresholds such as `p(95)<500` on `http_req_duration`.\n\nLogging is controlled with RUST_LOG (default: warn).",
    after_help = "Examples:\n  stampede run scenarios/load-test.yaml\n  stampede run scenarios/spike-test.yaml --base-url http://127.0.0.1:8080 --output json\n  stampede validate scenarios/stress-test.yaml\n\nExit codes: 0 passed, 11 thresholds failed, 12 aborted, 20 setup/teardown error, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test scenario
    #[command(
        long_about = "Run a YAML scenario: follow its stages, send its requests in every iteration and evaluate its thresholds.\n\nCLI flags override values from the scenario file."
    )]
    Run(RunArgs),

    /// Check a scenario file (stages, thresholds, URLs) without sending traffic
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario (.yaml)
    pub scenario: PathBuf,

    /// Base URL for relative request paths (overrides `baseUrl`)
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Virtual users running at t=0 (overrides `startVUs`)
    #[arg(long)]
    pub start_vus: Option<u64>,

    /// How long in-flight iterations may finish after the run ends (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Control loop tick (e.g. 1s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub tick_interval: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the scenario (.yaml)
    pub scenario: PathBuf,

    /// Base URL for relative request paths (overrides `baseUrl`)
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m 30s"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn cli_parses_run_overrides() {
        let parsed = Cli::try_parse_from([
            "stampede",
            "run",
            "load.yaml",
            "--base-url",
            "http://127.0.0.1:8080",
            "--start-vus",
            "3",
            "--graceful-stop",
            "5s",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scenario, PathBuf::from("load.yaml"));
                assert_eq!(args.base_url.as_deref(), Some("http://127.0.0.1:8080"));
                assert_eq!(args.start_vus, Some(3));
                assert_eq!(args.graceful_stop, Some(Duration::from_secs(5)));
                assert_eq!(args.tick_interval, None);
                assert_eq!(args.output, OutputFormat::Json);
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_validate() {
        let parsed = Cli::try_parse_from(["stampede", "validate", "spike.yaml"]);
        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Validate(args) => assert_eq!(args.scenario, PathBuf::from("spike.yaml")),
            Command::Run(_) => panic!("expected validate command"),
        }
    }
}

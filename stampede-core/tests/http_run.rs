use std::sync::Arc;
use std::time::Duration;

use stampede_core::metrics::{HTTP_REQ_DURATION, HTTP_REQS};
use stampede_core::{
    IterationContext, RunOptions, RunStatus, Runner, Stage, ThinkTime, ThresholdConfig, Verdict,
    scenario_fn,
};
use stampede_http::HttpRequest;
use stampede_metrics::MetricValue;
use stampede_testserver::TestServer;

fn options() -> RunOptions {
    RunOptions::new(vec![
        Stage::new(Duration::from_millis(500), 3),
        Stage::new(Duration::from_millis(1_000), 3),
    ])
    .with_tick_interval(Duration::from_millis(100))
    .with_think_time(ThinkTime::Fixed(Duration::from_millis(20)))
    .with_grace_period(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn healthy_target_passes_request_thresholds() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let url = Arc::new(server.url("/delay/10"));

    let scenario = scenario_fn(move |ctx: IterationContext| {
        let url = url.clone();
        async move {
            let res = ctx.request("delay", HttpRequest::get(url.as_str())).await?;
            ctx.check("status is 200", res.status == 200);
            anyhow::Ok(())
        }
    });
    let options = options()
        .with_threshold(ThresholdConfig::new("http_req_failed", "rate<0.01").abort_on_fail())
        .with_threshold(ThresholdConfig::new("http_req_duration", "p(95)<1000"));

    let report = Runner::new(scenario, options).run().await?;

    anyhow::ensure!(report.status == RunStatus::Passed, "{report:?}");
    anyhow::ensure!(report.iterations > 0);
    anyhow::ensure!(server.stats().requests_total() == report.iterations);

    let Some(reqs) = report.metric(HTTP_REQS) else {
        anyhow::bail!("missing {HTTP_REQS}");
    };
    anyhow::ensure!(matches!(reqs.values, MetricValue::Counter(n) if n == report.iterations));

    let Some(latency) = report.metric(HTTP_REQ_DURATION) else {
        anyhow::bail!("missing {HTTP_REQ_DURATION}");
    };
    let MetricValue::Histogram(h) = &latency.values else {
        anyhow::bail!("expected histogram, got {:?}", latency.values);
    };
    anyhow::ensure!(h.min.is_some_and(|min| min >= 9.0), "min {:?}", h.min);

    anyhow::ensure!(report.checks.len() == 1);
    anyhow::ensure!(report.checks[0].fails == 0);
    anyhow::ensure!(report.checks[0].passes == report.iterations);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_endpoint_fails_its_tagged_threshold() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let ok_url = Arc::new(server.url("/health"));
    let bad_url = Arc::new(server.url("/error-rate/100"));

    let scenario = scenario_fn(move |ctx: IterationContext| {
        let ok_url = ok_url.clone();
        let bad_url = bad_url.clone();
        async move {
            ctx.request("health", HttpRequest::get(ok_url.as_str())).await?;
            let res = ctx.request("flaky", HttpRequest::get(bad_url.as_str())).await?;
            ctx.check("flaky is 200", res.status == 200);
            anyhow::Ok(())
        }
    });
    let options = options()
        .with_threshold(ThresholdConfig::new("http_req_failed{name:health}", "rate<0.01"))
        .with_threshold(ThresholdConfig::new("http_req_failed{name:flaky}", "rate<0.5"));

    let report = Runner::new(scenario, options).run().await?;

    anyhow::ensure!(report.status == RunStatus::Failed, "{report:?}");
    anyhow::ensure!(report.thresholds[0].verdict == Verdict::Pass);
    anyhow::ensure!(report.thresholds[1].verdict == Verdict::Fail { observed: 1.0 });
    anyhow::ensure!(server.stats().errors_served() == report.iterations);
    anyhow::ensure!(report.checks[0].passes == 0);

    server.shutdown().await;
    Ok(())
}

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use stampede_core::{DEFAULT_GRACE_PERIOD, RunOptions, Stage, ThinkTime, ThresholdConfig};

/// A scenario file: the load profile, thresholds and the requests each iteration sends.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioFile {
    #[serde(default)]
    pub name: Option<String>,

    /// Prefix for every relative request path.
    #[serde(default)]
    pub base_url: Option<String>,

    pub stages: Vec<StageYaml>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: u64,

    #[serde(default)]
    pub think_time: Option<ThinkTimeYaml>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    #[serde(default)]
    pub tick_interval: Option<YamlDuration>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdListYaml>,

    pub requests: Vec<RequestYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThinkTimeYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdListYaml {
    Many(Vec<ThresholdYaml>),
    One(ThresholdYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(default, rename = "delayAbortEval")]
        delay_abort_eval: Option<YamlDuration>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Relative to `baseUrl`, or an absolute `http(s)://` URL.
    pub path: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub checks: Vec<CheckYaml>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum CheckYaml {
    StatusIs(u16),
    DurationBelow(YamlDuration),
    BodyNotEmpty(bool),
    BodyContains(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl From<Duration> for YamlDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom("duration must be a non-negative, finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl ScenarioFile {
    pub(crate) fn parse(source: &str) -> anyhow::Result<Self> {
        let file: Self = serde_yaml::from_str(source).context("invalid scenario YAML")?;
        if file.requests.is_empty() {
            anyhow::bail!("`requests` must list at least one request");
        }
        Ok(file)
    }

    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read scenario: {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("in {}", path.display()))
    }

    pub(crate) fn display_name<'a>(&'a self, path: &'a Path) -> std::borrow::Cow<'a, str> {
        match &self.name {
            Some(name) => name.as_str().into(),
            None => path
                .file_stem()
                .map_or_else(|| "scenario".into(), |s| s.to_string_lossy()),
        }
    }

    /// Builds the engine options. Validation of the result happens in the engine.
    pub(crate) fn run_options(&self) -> RunOptions {
        let stages = self
            .stages
            .iter()
            .map(|s| Stage::new(s.duration.into_inner(), s.target))
            .collect();

        let think_time = match &self.think_time {
            None => ThinkTime::None,
            Some(ThinkTimeYaml::Fixed(d)) => ThinkTime::Fixed(d.into_inner()),
            Some(ThinkTimeYaml::Range { min, max }) => ThinkTime::Uniform {
                min: min.into_inner(),
                max: max.into_inner(),
            },
        };

        let mut options = RunOptions::new(stages)
            .with_start_vus(self.start_vus)
            .with_think_time(think_time)
            .with_grace_period(
                self.graceful_stop
                    .map_or(DEFAULT_GRACE_PERIOD, YamlDuration::into_inner),
            );
        if let Some(tick) = self.tick_interval {
            options = options.with_tick_interval(tick.into_inner());
        }

        for (metric, list) in &self.thresholds {
            let items = match list {
                ThresholdListYaml::One(t) => std::slice::from_ref(t),
                ThresholdListYaml::Many(v) => v.as_slice(),
            };
            for item in items {
                options = options.with_threshold(threshold_config(metric, item));
            }
        }

        options
    }
}

fn threshold_config(metric: &str, item: &ThresholdYaml) -> ThresholdConfig {
    match item {
        ThresholdYaml::Expr(expr) => ThresholdConfig::new(metric, expr.as_str()),
        ThresholdYaml::Detailed {
            threshold,
            abort_on_fail,
            delay_abort_eval,
        } => {
            let mut cfg = ThresholdConfig::new(metric, threshold.as_str());
            if *abort_on_fail {
                cfg = cfg.abort_on_fail();
            }
            if let Some(delay) = delay_abort_eval {
                cfg = cfg.with_abort_grace(delay.into_inner());
            }
            cfg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOAD_TEST: &str = r#"
name: load-test
baseUrl: http://127.0.0.1:8080
stages:
  - { duration: 1m, target: 10 }
  - { duration: 3m, target: 10 }
  - { duration: 1m, target: 0 }
thinkTime: 1s
thresholds:
  http_req_duration: ["p(95)<500"]
  http_req_failed:
    - threshold: rate<0.01
      abortOnFail: true
      delayAbortEval: 10s
requests:
  - name: home
    path: /
    checks:
      - statusIs: 200
      - durationBelow: 500ms
"#;

    fn parse(src: &str) -> ScenarioFile {
        ScenarioFile::parse(src).unwrap_or_else(|err| panic!("{err:#}"))
    }

    #[test]
    fn parses_the_documented_format() {
        let file = parse(LOAD_TEST);
        assert_eq!(file.name.as_deref(), Some("load-test"));
        assert_eq!(file.stages.len(), 3);
        assert_eq!(file.requests[0].method, "GET");
        assert_eq!(
            file.requests[0].checks,
            vec![
                CheckYaml::StatusIs(200),
                CheckYaml::DurationBelow(Duration::from_millis(500).into())
            ]
        );

        let options = file.run_options();
        assert_eq!(options.total_duration(), Duration::from_secs(300));
        assert_eq!(options.think_time, ThinkTime::Fixed(Duration::from_secs(1)));
        assert_eq!(options.grace_period, DEFAULT_GRACE_PERIOD);
        assert_eq!(options.thresholds.len(), 2);

        let failed = options
            .thresholds
            .iter()
            .find(|t| t.metric == "http_req_failed")
            .unwrap_or_else(|| panic!("missing http_req_failed threshold"));
        assert!(failed.abort_on_fail);
        assert_eq!(failed.abort_grace, Some(Duration::from_secs(10)));
    }

    #[test]
    fn durations_accept_numbers_and_ranges() {
        let file = parse(
            r#"
stages: [{ duration: 90, target: 5 }, { duration: 0.5, target: 5 }, { target: 1 }]
thinkTime: { min: 1s, max: 3s }
gracefulStop: 5s
thresholds:
  iteration_failed: rate<0.05
requests: [{ name: x, path: /health }]
"#,
        );
        let options = file.run_options();
        assert_eq!(options.stages[0].duration, Duration::from_secs(90));
        assert_eq!(options.stages[1].duration, Duration::from_millis(500));
        assert_eq!(options.stages[2].duration, Duration::ZERO);
        assert_eq!(
            options.think_time,
            ThinkTime::Uniform {
                min: Duration::from_secs(1),
                max: Duration::from_secs(3)
            }
        );
        assert_eq!(options.grace_period, Duration::from_secs(5));
        assert_eq!(options.thresholds[0].expression, "rate<0.05");
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(ScenarioFile::parse("stages: []\nrequests: []\n").is_err());
        assert!(
            ScenarioFile::parse(
                "stages: [{ duration: -1, target: 1 }]\nrequests: [{ name: x, path: / }]\n"
            )
            .is_err()
        );
        assert!(
            ScenarioFile::parse(
                "stages: [{ duration: 10x, target: 1 }]\nrequests: [{ name: x, path: / }]\n"
            )
            .is_err()
        );
        assert!(
            ScenarioFile::parse(
                "stages: [{ duration: 1s, target: 1 }]\nrequests: [{ name: x, path: / }]\nvus: 3\n"
            )
            .is_err()
        );
    }

    #[test]
    fn display_name_falls_back_to_file_stem() {
        let mut file = parse(LOAD_TEST);
        let path = Path::new("scenarios/spike-test.yaml");
        assert_eq!(file.display_name(path), "load-test");
        file.name = None;
        assert_eq!(file.display_name(path), "spike-test");
    }

    #[test]
    fn bundled_scenarios_parse() {
        for (src, total) in [
            (include_str!("../../scenarios/load-test.yaml"), 300),
            (include_str!("../../scenarios/stress-test.yaml"), 960),
            (include_str!("../../scenarios/spike-test.yaml"), 150),
        ] {
            let options = parse(src).run_options();
            assert_eq!(options.total_duration(), Duration::from_secs(total));
            assert!(options.validate().is_ok());
            assert_eq!(options.thresholds.len(), 2);
        }
    }
}

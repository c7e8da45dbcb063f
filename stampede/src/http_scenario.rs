use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use stampede_core::{IterationContext, Scenario};
use stampede_http::{HttpRequest, HttpResponse};

use crate::scenario_yaml::{CheckYaml, RequestYaml, ScenarioFile};

/// Response assertion recorded on the `checks` metric under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Check {
    name: String,
    kind: CheckKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CheckKind {
    StatusIs(u16),
    DurationBelow(Duration),
    BodyNotEmpty,
    BodyContains(String),
}

impl Check {
    fn from_yaml(check: &CheckYaml) -> Option<Self> {
        let (name, kind) = match check {
            CheckYaml::StatusIs(code) => (format!("status is {code}"), CheckKind::StatusIs(*code)),
            CheckYaml::DurationBelow(d) => {
                let d = d.into_inner();
                (
                    format!("response time < {}", humantime::format_duration(d)),
                    CheckKind::DurationBelow(d),
                )
            }
            CheckYaml::BodyNotEmpty(false) => return None,
            CheckYaml::BodyNotEmpty(true) => (
                "response body contains content".to_string(),
                CheckKind::BodyNotEmpty,
            ),
            CheckYaml::BodyContains(needle) => (
                format!("body contains {needle:?}"),
                CheckKind::BodyContains(needle.clone()),
            ),
        };
        Some(Self { name, kind })
    }

    fn passes(&self, res: &HttpResponse) -> bool {
        match &self.kind {
            CheckKind::StatusIs(code) => res.status == *code,
            CheckKind::DurationBelow(limit) => res.elapsed < *limit,
            CheckKind::BodyNotEmpty => !res.body.is_empty(),
            CheckKind::BodyContains(needle) => res
                .body_utf8()
                .is_some_and(|body| body.contains(needle.as_str())),
        }
    }
}

#[derive(Debug, Clone)]
struct PreparedRequest {
    name: String,
    method: http::Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    timeout: Option<Duration>,
    checks: Vec<Check>,
}

impl PreparedRequest {
    fn to_request(&self) -> HttpRequest {
        let mut req = HttpRequest::new(self.method.clone(), self.url.as_str());
        for (name, value) in &self.headers {
            req = req.with_header(name.as_str(), value.as_str());
        }
        req.body = self.body.clone();
        if let Some(timeout) = self.timeout {
            req = req.with_timeout(timeout);
        }
        req
    }
}

fn resolve_url(base_url: Option<&url::Url>, path: &str) -> anyhow::Result<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        let url = url::Url::parse(path).with_context(|| format!("invalid request URL `{path}`"))?;
        return Ok(url.to_string());
    }
    let base = base_url.with_context(|| {
        format!("request path `{path}` is relative but no base URL is set (use `baseUrl`, --base-url or BASE_URL)")
    })?;
    let base = base.as_str().trim_end_matches('/');
    if path.is_empty() || path.starts_with('/') {
        Ok(format!("{base}{path}"))
    } else {
        Ok(format!("{base}/{path}"))
    }
}

fn prepare(req: &RequestYaml, base_url: Option<&url::Url>) -> anyhow::Result<PreparedRequest> {
    let method = http::Method::from_bytes(req.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("request `{}`: invalid method `{}`", req.name, req.method))?;
    Ok(PreparedRequest {
        name: req.name.clone(),
        method,
        url: resolve_url(base_url, &req.path)
            .with_context(|| format!("request `{}`", req.name))?,
        headers: req
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        body: req.body.clone().map(Bytes::from).unwrap_or_default(),
        timeout: req.timeout.map(|t| t.into_inner()),
        checks: req.checks.iter().filter_map(Check::from_yaml).collect(),
    })
}

/// Sends the file's requests in order, once per iteration, and records their checks.
///
/// A transport error ends the iteration as failed; the remaining requests are skipped.
#[derive(Debug, Clone)]
pub(crate) struct HttpScenario {
    requests: Vec<PreparedRequest>,
}

impl HttpScenario {
    /// `base_url` overrides the file's `baseUrl`.
    pub(crate) fn from_file(file: &ScenarioFile, base_url: Option<&str>) -> anyhow::Result<Self> {
        let base_url = base_url
            .or(file.base_url.as_deref())
            .map(|raw| url::Url::parse(raw).with_context(|| format!("invalid base URL `{raw}`")))
            .transpose()?;
        if let Some(base) = &base_url
            && !matches!(base.scheme(), "http" | "https")
        {
            anyhow::bail!("unsupported base URL scheme `{}`", base.scheme());
        }

        let requests = file
            .requests
            .iter()
            .map(|r| prepare(r, base_url.as_ref()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { requests })
    }

    pub(crate) fn urls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.requests
            .iter()
            .map(|r| (r.name.as_str(), r.url.as_str()))
    }
}

impl Scenario for HttpScenario {
    async fn run(&self, ctx: IterationContext) -> anyhow::Result<()> {
        for req in &self.requests {
            let res = ctx
                .request(&req.name, req.to_request())
                .await
                .with_context(|| format!("{} {} failed", req.method, req.url))?;
            for check in &req.checks {
                ctx.check(&check.name, check.passes(&res));
            }
        }
        Ok(())
    }
}

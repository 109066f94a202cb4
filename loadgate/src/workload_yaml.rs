use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use loadgate_core::runner::{
    BodyContainsCheck, DEFAULT_GRACEFUL_STOP, DEFAULT_SCENARIO, RampMode, RequestSpec, Stage,
    StaticRequest, StatusCheck, ThresholdSet, WorkloadDefinition,
};
use serde::Deserialize;

use crate::cli::RunArgs;

/// Duration used when neither the command line nor the file names a stop condition.
pub(crate) const DEFAULT_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct WorkloadFile {
    pub name: Option<String>,

    pub vus: Option<u64>,
    #[serde(default)]
    pub duration: Option<YamlDuration>,
    pub iterations: Option<u64>,

    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,
    #[serde(default)]
    pub stages: Vec<StageYaml>,
    /// stepped | linear
    pub ramp: Option<String>,

    #[serde(default)]
    pub think_time: Option<YamlDuration>,
    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    pub request: Option<RequestYaml>,

    #[serde(default)]
    pub checks: Vec<CheckYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdsYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    pub method: Option<String>,
    pub url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_headers")]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub timeout: Option<YamlDuration>,
    /// Total sends per request, including the first one.
    pub attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CheckYaml {
    pub name: Option<String>,
    pub status: Option<u16>,
    pub body_contains: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdsYaml {
    Many(Vec<ThresholdYaml>),
    One(ThresholdYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    Expr(String),
    #[serde(rename_all = "camelCase")]
    Full {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
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
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
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

/// Header values may be written as YAML scalars of any type.
fn deserialize_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => {
                return Err(serde::de::Error::custom(format!(
                    "header `{k}` must be a scalar value"
                )));
            }
        };
        out.insert(k, s);
    }

    Ok(out)
}

pub(crate) fn parse(raw: &str) -> anyhow::Result<WorkloadFile> {
    let file: WorkloadFile = serde_yaml::from_str(raw)?;
    Ok(file)
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<WorkloadFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read workload file: {}", path.display()))?;
    parse(&raw).with_context(|| format!("failed to parse workload file: {}", path.display()))
}

/// Workload assembled from flags, file values and defaults, in that order of precedence.
pub(crate) struct ResolvedWorkload {
    pub definition: WorkloadDefinition,
    pub attempts: u32,
}

pub(crate) fn resolve(args: &RunArgs, file: WorkloadFile) -> anyhow::Result<ResolvedWorkload> {
    let request_file = file.request.unwrap_or_default();

    let url = args
        .url
        .clone()
        .or(request_file.url)
        .context("no target URL (use --url or `request.url` in the workload file)")?;

    let method = args
        .method
        .clone()
        .or(request_file.method)
        .unwrap_or_else(|| "GET".to_string());
    let method = http::Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {method}"))?;

    let mut request = RequestSpec::new(method, url);
    for (name, value) in merge_headers(request_file.headers, &args.headers) {
        request = request.with_header(name, value);
    }
    if let Some(body) = args.body.clone().or(request_file.body) {
        request = request.with_body(body);
    }
    if let Some(timeout) = args
        .timeout
        .or(request_file.timeout.map(YamlDuration::into_inner))
    {
        request = request.with_timeout(timeout);
    }
    let attempts = args.attempts.or(request_file.attempts).unwrap_or(1);
    if attempts == 0 {
        anyhow::bail!("`attempts` must be at least 1");
    }

    let mut def = WorkloadDefinition::new(StaticRequest(request));
    def.name = args
        .name
        .clone()
        .or(file.name)
        .unwrap_or_else(|| DEFAULT_SCENARIO.to_string());

    let file_ramp = file
        .ramp
        .as_deref()
        .map(|r| {
            r.parse::<RampMode>()
                .map_err(|_| anyhow::anyhow!("invalid ramp `{r}` (expected stepped or linear)"))
        })
        .transpose()?;
    let ramp = args.ramp.or(file_ramp).unwrap_or_default();
    let start_vus = args.start_vus.or(file.start_vus).unwrap_or(0);
    let file_stages: Vec<Stage> = file
        .stages
        .into_iter()
        .map(|s| Stage {
            duration: s.duration.into_inner(),
            target: s.target,
        })
        .collect();

    let ramping = if !args.stages.is_empty() {
        Some(args.stages.clone())
    } else if args.vus.is_some() {
        None
    } else if !file_stages.is_empty() {
        Some(file_stages)
    } else {
        None
    };

    def = match ramping {
        Some(stages) => def.stages(start_vus, stages, ramp),
        None => def.vus(args.vus.or(file.vus).unwrap_or(1)),
    };

    let duration = args.duration.or(file.duration.map(YamlDuration::into_inner));
    let iterations = args.iterations.or(file.iterations);
    if let Some(d) = duration {
        def = def.duration(d);
    } else if iterations.is_none() && is_constant(&def) {
        def = def.duration(DEFAULT_DURATION);
    }
    if let Some(n) = iterations {
        def = def.iterations(n);
    }

    if let Some(think) = args
        .think_time
        .or(file.think_time.map(YamlDuration::into_inner))
    {
        def = def.think_time(think);
    }
    def = def.graceful_stop(
        args.graceful_stop
            .or(file.graceful_stop.map(YamlDuration::into_inner))
            .unwrap_or(DEFAULT_GRACEFUL_STOP),
    );

    if args.check_status.is_empty() && args.check_body.is_empty() {
        for (idx, check) in file.checks.into_iter().enumerate() {
            def = match (check.status, check.body_contains) {
                (Some(status), None) => {
                    let c = StatusCheck::new(status);
                    def.check(match check.name {
                        Some(name) => c.named(name),
                        None => c,
                    })
                }
                (None, Some(needle)) => {
                    let c = BodyContainsCheck::new(needle);
                    def.check(match check.name {
                        Some(name) => c.named(name),
                        None => c,
                    })
                }
                _ => anyhow::bail!(
                    "check #{} must set exactly one of `status` or `bodyContains`",
                    idx + 1
                ),
            };
        }
    } else {
        for status in &args.check_status {
            def = def.check(StatusCheck::new(*status));
        }
        for needle in &args.check_body {
            def = def.check(BodyContainsCheck::new(needle.clone()));
        }
    }

    if args.thresholds.is_empty() {
        for (metric, entries) in file.thresholds {
            let entries = match entries {
                ThresholdsYaml::One(e) => vec![e],
                ThresholdsYaml::Many(v) => v,
            };
            let mut plain = Vec::new();
            let mut aborting = Vec::new();
            for entry in entries {
                match entry {
                    ThresholdYaml::Expr(expr) => plain.push(expr),
                    ThresholdYaml::Full {
                        threshold,
                        abort_on_fail: true,
                    } => aborting.push(threshold),
                    ThresholdYaml::Full { threshold, .. } => plain.push(threshold),
                }
            }
            if !plain.is_empty() {
                def = def.threshold(ThresholdSet::new(metric.clone(), plain));
            }
            if !aborting.is_empty() {
                def = def.threshold(ThresholdSet::new(metric, aborting).abort_on_fail());
            }
        }
    } else {
        let mut by_metric: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for raw in &args.thresholds {
            let (metric, expr) = split_threshold_flag(raw)?;
            by_metric.entry(metric).or_default().push(expr);
        }
        for (metric, exprs) in by_metric {
            def = def.threshold(ThresholdSet::new(metric, exprs));
        }
    }

    Ok(ResolvedWorkload {
        definition: def,
        attempts,
    })
}

fn is_constant(def: &WorkloadDefinition) -> bool {
    matches!(def.load, loadgate_core::runner::LoadProfile::Constant { .. })
}

/// File headers first; a flag replaces a file header with the same (case-insensitive) name.
fn merge_headers(
    file: BTreeMap<String, String>,
    flags: &[(String, String)],
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = file
        .into_iter()
        .filter(|(k, _)| !flags.iter().any(|(f, _)| f.eq_ignore_ascii_case(k)))
        .collect();
    out.extend(flags.iter().cloned());
    out
}

/// Splits `METRIC:EXPR`, where the metric may carry a `{tag:value}` selector.
fn split_threshold_flag(raw: &str) -> anyhow::Result<(String, String)> {
    let search_from = raw.find('}').map_or(0, |idx| idx + 1);
    let colon = raw[search_from..]
        .find(':')
        .map(|idx| idx + search_from)
        .with_context(|| format!("invalid --threshold `{raw}` (expected METRIC:EXPR)"))?;
    let (metric, expr) = (raw[..colon].trim(), raw[colon + 1..].trim());
    if metric.is_empty() || expr.is_empty() {
        anyhow::bail!("invalid --threshold `{raw}` (expected METRIC:EXPR)");
    }
    Ok((metric.to_string(), expr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgate_core::runner::{Check as _, LoadProfile, RequestBuilder as _};

    const FILE: &str = r#"
name: hand-probability
vus: 100
duration: 10s
gracefulStop: 5s
request:
  method: post
  url: http://localhost:8081/hand/probability
  headers:
    Content-Type: application/json
  body: '{"hole":["HA","SA"],"community":[],"num_players":5,"simulations":10000}'
  timeout: 2s
checks:
  - name: is status 200
    status: 200
thresholds:
  http_req_duration: ["p(95)<500"]
  http_req_failed:
    - threshold: rate<0.01
      abortOnFail: true
"#;

    fn file() -> WorkloadFile {
        parse(FILE).unwrap_or_else(|e| panic!("{e:#}"))
    }

    fn built_request(def: &WorkloadDefinition) -> RequestSpec {
        let builder = def
            .request
            .as_ref()
            .unwrap_or_else(|| panic!("request builder missing"));
        let ctx = loadgate_core::runner::IterationContext {
            scenario: "t",
            vu: 1,
            iteration: 0,
        };
        builder.build(&ctx).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn file_values_are_used_without_flags() {
        let resolved = resolve(&RunArgs::default(), file()).unwrap_or_else(|e| panic!("{e:#}"));
        let def = resolved.definition;

        assert_eq!(def.name, "hand-probability");
        assert_eq!(def.load, LoadProfile::Constant { vus: 100 });
        assert_eq!(def.duration, Some(Duration::from_secs(10)));
        assert_eq!(def.graceful_stop, Duration::from_secs(5));
        assert_eq!(def.checks.len(), 1);
        assert_eq!(def.checks[0].name(), "is status 200");
        assert_eq!(def.thresholds.len(), 2);
        assert!(
            def.thresholds
                .iter()
                .any(|t| t.metric == "http_req_failed" && t.abort_on_fail)
        );

        let req = built_request(&def);
        assert_eq!(req.method, http::Method::POST);
        assert_eq!(req.timeout, Some(Duration::from_secs(2)));
        assert_eq!(req.headers.len(), 1);
        assert_eq!(resolved.attempts, 1);
    }

    #[test]
    fn flags_override_file_values() {
        let args = RunArgs {
            vus: Some(5),
            duration: Some(Duration::from_secs(2)),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            check_status: vec![201],
            thresholds: vec!["http_reqs{status:200}:count>10".to_string()],
            ..RunArgs::default()
        };
        let def = resolve(&args, file())
            .unwrap_or_else(|e| panic!("{e:#}"))
            .definition;

        assert_eq!(def.load, LoadProfile::Constant { vus: 5 });
        assert_eq!(def.duration, Some(Duration::from_secs(2)));
        assert_eq!(def.checks.len(), 1);
        assert_eq!(def.checks[0].name(), "is status 201");
        assert_eq!(def.thresholds.len(), 1);
        assert_eq!(def.thresholds[0].metric, "http_reqs{status:200}");
        assert_eq!(def.thresholds[0].expressions, vec!["count>10".to_string()]);

        let req = built_request(&def);
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let args = RunArgs {
            url: Some("http://127.0.0.1:1/".to_string()),
            ..RunArgs::default()
        };
        let def = resolve(&args, WorkloadFile::default())
            .unwrap_or_else(|e| panic!("{e:#}"))
            .definition;

        assert_eq!(def.name, DEFAULT_SCENARIO);
        assert_eq!(def.load, LoadProfile::Constant { vus: 1 });
        assert_eq!(def.duration, Some(DEFAULT_DURATION));
        assert_eq!(def.graceful_stop, DEFAULT_GRACEFUL_STOP);
        assert!(def.checks.is_empty());
        assert_eq!(built_request(&def).method, http::Method::GET);
    }

    #[test]
    fn stages_from_file_build_a_ramp() {
        let raw = r#"
request: { url: "http://127.0.0.1:1/" }
startVUs: 1
ramp: linear
stages:
  - { duration: 2s, target: 5 }
  - { duration: 1, target: 0 }
"#;
        let def = resolve(&RunArgs::default(), parse(raw).unwrap_or_else(|e| panic!("{e:#}")))
            .unwrap_or_else(|e| panic!("{e:#}"))
            .definition;
        match def.load {
            LoadProfile::Ramping {
                start_vus,
                stages,
                ramp,
            } => {
                assert_eq!(start_vus, 1);
                assert_eq!(ramp, RampMode::Linear);
                assert_eq!(stages[1].duration, Duration::from_secs(1));
            }
            other => panic!("expected a ramp, got {other:?}"),
        }
        assert_eq!(def.duration, None);
    }

    #[test]
    fn invalid_input_is_reported() {
        assert!(resolve(&RunArgs::default(), WorkloadFile::default()).is_err());
        assert!(parse("vus: 1\nunknown: 2\n").is_err());
        assert!(parse("duration: 10x\n").is_err());

        let bad_check = parse("request: { url: 'http://x/' }\nchecks: [{ name: c }]\n")
            .unwrap_or_else(|e| panic!("{e:#}"));
        assert!(resolve(&RunArgs::default(), bad_check).is_err());

        assert!(split_threshold_flag("http_req_duration").is_err());
        assert_eq!(
            split_threshold_flag("http_req_duration: p(95) < 500").unwrap_or_else(|e| panic!("{e}")),
            ("http_req_duration".to_string(), "p(95) < 500".to_string())
        );
    }
}

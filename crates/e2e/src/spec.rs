//! Declarative YAML test specification

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::{E2eError, E2eResult};
use crate::fixture::{Fixture, FixtureContext, FixtureRequest};
use crate::page::{Locator, WaitState};
use crate::readiness::ReadinessOptions;

/// A complete test specification parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this test
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    #[serde(default)]
    pub setup: Setup,

    /// Fixtures without which the test is skipped
    #[serde(default)]
    pub requires: Vec<Fixture>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,
}

fn default_viewport() -> Viewport {
    Viewport { width: 1280, height: 720 }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// What to prepare before the first step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    /// Bootstrap an authenticated session (browser tests only)
    #[serde(default = "default_true")]
    pub login: bool,

    /// Backend fixtures to provision; omitted means none
    #[serde(default)]
    pub fixtures: Option<FixtureRequest>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            login: true,
            fixtures: None,
        }
    }
}

/// A single step in a test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL (relative to base), optionally waiting for readiness
    Navigate {
        url: String,
        #[serde(default)]
        ready: Option<ReadinessOptions>,
    },

    /// Wait for readiness signals on the current page
    WaitReady {
        #[serde(default)]
        heading: Option<String>,
        #[serde(default)]
        loading_gone: bool,
        #[serde(default)]
        test_id: Option<String>,
        #[serde(default = "default_ready_timeout")]
        timeout_ms: u64,
    },

    /// Click an element
    Click { locator: Locator },

    /// Fill an input field
    Fill { locator: Locator, value: String },

    /// Press a key in an element
    Press { locator: Locator, key: String },

    /// Wait for an element to reach a state
    Wait {
        locator: Locator,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Assert something about an element
    Assert {
        locator: Locator,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        min_count: Option<usize>,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Assert the current URL contains a fragment
    AssertUrl { contains: String },

    /// Take a screenshot
    Screenshot {
        name: String,
        #[serde(default)]
        full_page: bool,
    },

    /// Run the session bootstrap again mid-test
    Login,

    /// Clear the session and return to the login view
    Logout,

    /// Call the backend directly
    Api {
        #[serde(default = "default_method")]
        method: String,
        path: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        expect_status: Option<u16>,
        /// Subset the response body must contain
        #[serde(default)]
        expect_json: Option<Value>,
    },

    /// Run a backend tool through the tool execution endpoint
    ExecuteTool {
        tool: String,
        #[serde(default)]
        input: Value,
        #[serde(default = "default_true")]
        expect_success: bool,
    },

    /// Log a message (for debugging)
    Log { message: String },
}

fn default_wait_timeout() -> u64 {
    5000 // 5 seconds default
}

fn default_ready_timeout() -> u64 {
    10_000
}

fn default_method() -> String {
    "GET".to_string()
}

fn render_json(value: &Value, context: &FixtureContext) -> E2eResult<Value> {
    Ok(match value {
        Value::String(s) => Value::String(context.render(s)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_json(v, context))
                .collect::<E2eResult<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_json(v, context)?)))
                .collect::<E2eResult<_>>()?,
        ),
        other => other.clone(),
    })
}

fn render_ready(options: &ReadinessOptions, context: &FixtureContext) -> E2eResult<ReadinessOptions> {
    Ok(ReadinessOptions {
        heading: options.heading.as_deref().map(|s| context.render(s)).transpose()?,
        test_id: options.test_id.as_deref().map(|s| context.render(s)).transpose()?,
        ..options.clone()
    })
}

impl TestStep {
    /// Short label used in logs and results
    pub fn describe(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate:{}", url),
            TestStep::WaitReady { .. } => "wait_ready".to_string(),
            TestStep::Click { locator } => format!("click:{}", locator),
            TestStep::Fill { locator, .. } => format!("fill:{}", locator),
            TestStep::Press { key, .. } => format!("press:{}", key),
            TestStep::Wait { locator, .. } => format!("wait:{}", locator),
            TestStep::Sleep { ms } => format!("sleep:{}ms", ms),
            TestStep::Assert { locator, .. } => format!("assert:{}", locator),
            TestStep::AssertUrl { contains } => format!("assert_url:{}", contains),
            TestStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            TestStep::Login => "login".to_string(),
            TestStep::Logout => "logout".to_string(),
            TestStep::Api { method, path, .. } => format!("api:{} {}", method, path),
            TestStep::ExecuteTool { tool, .. } => format!("tool:{}", tool),
            TestStep::Log { message } => format!("log:{}", message.chars().take(30).collect::<String>()),
        }
    }

    /// Whether the step drives the browser
    pub fn needs_browser(&self) -> bool {
        !matches!(
            self,
            TestStep::Api { .. } | TestStep::ExecuteTool { .. } | TestStep::Sleep { .. } | TestStep::Log { .. }
        )
    }

    /// Substitute `{{ fixture }}` placeholders in every string argument
    pub fn render(&self, context: &FixtureContext) -> E2eResult<TestStep> {
        let r = |s: &str| context.render(s);
        Ok(match self {
            TestStep::Navigate { url, ready } => TestStep::Navigate {
                url: r(url)?,
                ready: ready.as_ref().map(|options| render_ready(options, context)).transpose()?,
            },
            TestStep::WaitReady {
                heading,
                loading_gone,
                test_id,
                timeout_ms,
            } => TestStep::WaitReady {
                heading: heading.as_deref().map(r).transpose()?,
                loading_gone: *loading_gone,
                test_id: test_id.as_deref().map(r).transpose()?,
                timeout_ms: *timeout_ms,
            },
            TestStep::Click { locator } => TestStep::Click {
                locator: locator.try_map(r)?,
            },
            TestStep::Fill { locator, value } => TestStep::Fill {
                locator: locator.try_map(r)?,
                value: r(value)?,
            },
            TestStep::Press { locator, key } => TestStep::Press {
                locator: locator.try_map(r)?,
                key: r(key)?,
            },
            TestStep::Wait { locator, timeout_ms, state } => TestStep::Wait {
                locator: locator.try_map(r)?,
                timeout_ms: *timeout_ms,
                state: *state,
            },
            TestStep::Assert {
                locator,
                visible,
                text_contains,
                count,
                min_count,
                timeout_ms,
            } => TestStep::Assert {
                locator: locator.try_map(r)?,
                visible: *visible,
                text_contains: text_contains.as_deref().map(r).transpose()?,
                count: *count,
                min_count: *min_count,
                timeout_ms: *timeout_ms,
            },
            TestStep::AssertUrl { contains } => TestStep::AssertUrl { contains: r(contains)? },
            TestStep::Api {
                method,
                path,
                body,
                expect_status,
                expect_json,
            } => TestStep::Api {
                method: method.clone(),
                path: r(path)?,
                body: body.as_ref().map(|b| render_json(b, context)).transpose()?,
                expect_status: *expect_status,
                expect_json: expect_json.as_ref().map(|b| render_json(b, context)).transpose()?,
            },
            TestStep::ExecuteTool {
                tool,
                input,
                expect_success,
            } => TestStep::ExecuteTool {
                tool: r(tool)?,
                input: render_json(input, context)?,
                expect_success: *expect_success,
            },
            TestStep::Screenshot { name, full_page } => TestStep::Screenshot {
                name: r(name)?,
                full_page: *full_page,
            },
            TestStep::Log { message } => TestStep::Log { message: r(message)? },
            other => other.clone(),
        })
    }
}

impl TestSpec {
    /// Parse a test spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a test spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all test specs from a directory, sorted by file path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Whether any step needs a browser page
    pub fn needs_browser(&self) -> bool {
        self.steps.iter().any(TestStep::needs_browser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_navigation_spec() {
        let yaml = r#"
name: pipelines-page
description: Pipelines list renders
tags:
  - navigation
  - smoke
steps:
  - action: navigate
    url: /pipelines
    ready:
      heading: Pipelines
      loading_gone: true
  - action: click
    locator: { role: button, name: Create Pipeline }
  - action: fill
    locator: { placeholder: Pipeline name }
    value: nightly
  - action: assert
    locator: { test_id: pipeline-card }
    min_count: 1
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "pipelines-page");
        assert_eq!(spec.steps.len(), 4);
        assert!(spec.setup.login);
        assert!(spec.setup.fixtures.is_none());
        assert!(spec.needs_browser());

        match &spec.steps[0] {
            TestStep::Navigate { ready: Some(ready), .. } => {
                assert_eq!(ready.heading.as_deref(), Some("Pipelines"));
                assert_eq!(ready.timeout_ms, 10_000);
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_parse_api_spec() {
        let yaml = r#"
name: api-health
tags: [api]
setup:
  login: false
steps:
  - action: api
    path: /health
    expect_status: 200
    expect_json: { status: healthy }
  - action: execute_tool
    tool: Input.csv
    input: { file_path: /tmp/x.csv }
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert!(!spec.setup.login);
        assert!(!spec.needs_browser());
        match &spec.steps[0] {
            TestStep::Api { method, expect_status, .. } => {
                assert_eq!(method, "GET");
                assert_eq!(*expect_status, Some(200));
            }
            other => panic!("unexpected step: {:?}", other),
        }
        match &spec.steps[1] {
            TestStep::ExecuteTool { expect_success, .. } => assert!(expect_success),
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_parse_setup_and_requires() {
        let yaml = r#"
name: twin-detail
setup:
  fixtures: { twin: true }
requires: [twin]
steps:
  - action: navigate
    url: /digital-twins/{{twin_id}}
  - action: logout
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        let fixtures = spec.setup.fixtures.unwrap();
        assert!(fixtures.ontology);
        assert!(fixtures.twin);
        assert_eq!(spec.requires, vec![Fixture::Twin]);
        assert!(matches!(spec.steps[1], TestStep::Logout));
    }

    #[test]
    fn test_render_fills_placeholders() {
        let context = FixtureContext {
            pipeline_id: Some("p-1".into()),
            ..Default::default()
        };
        let step = TestStep::Api {
            method: "POST".into(),
            path: "/api/v1/pipelines/{{pipeline_id}}/execute".into(),
            body: Some(serde_json::json!({ "pipeline_id": "{{pipeline_id}}", "dry_run": true })),
            expect_status: None,
            expect_json: None,
        };

        match step.render(&context).unwrap() {
            TestStep::Api { path, body, .. } => {
                assert_eq!(path, "/api/v1/pipelines/p-1/execute");
                assert_eq!(body.unwrap()["pipeline_id"], "p-1");
            }
            other => panic!("unexpected step: {:?}", other),
        }

        let step = TestStep::Click {
            locator: Locator::test_id("twin-{{twin_id}}"),
        };
        assert!(matches!(step.render(&context), Err(E2eError::MissingFixture(_))));
    }

    #[test]
    fn test_render_fills_readiness_signals() {
        let context = FixtureContext {
            twin_id: Some("t-1".into()),
            ..Default::default()
        };

        let step = TestStep::WaitReady {
            heading: Some("Twin {{twin_id}}".into()),
            loading_gone: true,
            test_id: Some("twin-{{twin_id}}".into()),
            timeout_ms: 10_000,
        };
        match step.render(&context).unwrap() {
            TestStep::WaitReady { heading, test_id, loading_gone, .. } => {
                assert_eq!(heading.as_deref(), Some("Twin t-1"));
                assert_eq!(test_id.as_deref(), Some("twin-t-1"));
                assert!(loading_gone);
            }
            other => panic!("unexpected step: {:?}", other),
        }

        let step = TestStep::Navigate {
            url: "/digital-twins/{{twin_id}}".into(),
            ready: Some(ReadinessOptions::heading("Twin {{twin_id}}").with_test_id("twin-{{twin_id}}")),
        };
        match step.render(&context).unwrap() {
            TestStep::Navigate { url, ready: Some(ready) } => {
                assert_eq!(url, "/digital-twins/t-1");
                assert_eq!(ready.heading.as_deref(), Some("Twin t-1"));
                assert_eq!(ready.test_id.as_deref(), Some("twin-t-1"));
            }
            other => panic!("unexpected step: {:?}", other),
        }

        let step = TestStep::ExecuteTool {
            tool: "Twin.{{twin_id}}".into(),
            input: Value::Null,
            expect_success: true,
        };
        assert!(matches!(
            step.render(&context).unwrap(),
            TestStep::ExecuteTool { tool, .. } if tool == "Twin.t-1"
        ));
    }

    #[test]
    fn test_unrendered_readiness_signal_reports_missing_fixture() {
        let empty = FixtureContext::default();

        let step = TestStep::WaitReady {
            heading: None,
            loading_gone: false,
            test_id: Some("twin-{{twin_id}}".into()),
            timeout_ms: 10_000,
        };
        assert!(matches!(step.render(&empty), Err(E2eError::MissingFixture(key)) if key == "twin_id"));

        let step = TestStep::Navigate {
            url: "/digital-twins".into(),
            ready: Some(ReadinessOptions::heading("Twin {{twin_id}}")),
        };
        assert!(matches!(step.render(&empty), Err(E2eError::MissingFixture(_))));
    }

    #[test]
    fn test_filter_by_tag() {
        let specs = vec![
            TestSpec::from_yaml("name: a\ntags: [chat]\nsteps: []").unwrap(),
            TestSpec::from_yaml("name: b\ntags: [auth]\nsteps: []").unwrap(),
        ];
        let chat = TestSpec::filter_by_tag(&specs, "chat");
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].name, "a");
    }

    #[test]
    fn test_bundled_specs_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("specs");
        let specs = TestSpec::load_all(&dir).unwrap();
        assert!(specs.len() >= 6);

        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names[0], "api-health");
        assert!(names.contains(&"digital-twins"));

        let smoke = TestSpec::filter_by_tag(&specs, "smoke");
        assert!(smoke.iter().any(|s| !s.needs_browser()));

        let find = |name: &str| specs.iter().find(|s| s.name == name).unwrap();
        let api_calls = |spec: &TestSpec| -> Vec<(String, String)> {
            spec.steps
                .iter()
                .filter_map(|step| match step {
                    TestStep::Api { method, path, .. } => Some((method.to_uppercase(), path.clone())),
                    _ => None,
                })
                .collect()
        };

        let crud = find("pipeline-crud");
        assert_eq!(crud.requires, vec![Fixture::Pipeline]);
        let methods: Vec<String> = api_calls(crud).into_iter().map(|(m, _)| m).collect();
        assert!(methods.contains(&"PUT".to_string()));
        assert!(methods.contains(&"DELETE".to_string()));
        assert!(crud.steps.iter().any(|s| matches!(s, TestStep::Fill { value, .. } if value == "E2E Form Pipeline")));

        let simulation = find("twin-simulation");
        assert!(api_calls(simulation)
            .iter()
            .any(|(m, p)| m == "POST" && p == "/api/v1/twins/{{twin_id}}/simulations"));
    }
}

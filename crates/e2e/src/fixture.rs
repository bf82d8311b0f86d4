//! Fixture context shared between setup and test steps

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("placeholder pattern is valid"));

/// Prerequisite resources a test can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixture {
    Ontology,
    Pipeline,
    ExtractionJob,
    Twin,
}

impl Fixture {
    /// Placeholder name under which the fixture's id is rendered
    pub fn key(&self) -> &'static str {
        match self {
            Fixture::Ontology => "ontology_id",
            Fixture::Pipeline => "pipeline_id",
            Fixture::ExtractionJob => "extraction_job_id",
            Fixture::Twin => "twin_id",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Which fixtures to provision before a test. An ontology is requested unless
/// turned off explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureRequest {
    #[serde(default = "default_true")]
    pub ontology: bool,
    #[serde(default)]
    pub pipeline: bool,
    #[serde(default)]
    pub extraction_job: bool,
    #[serde(default)]
    pub twin: bool,
}

impl Default for FixtureRequest {
    fn default() -> Self {
        Self {
            ontology: true,
            pipeline: false,
            extraction_job: false,
            twin: false,
        }
    }
}

impl FixtureRequest {
    pub fn none() -> Self {
        Self {
            ontology: false,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.ontology || self.pipeline || self.extraction_job || self.twin)
    }
}

/// Ids provisioned for a test; `None` means not provisioned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureContext {
    pub ontology_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub extraction_job_id: Option<String>,
    pub twin_id: Option<String>,
}

impl FixtureContext {
    pub fn id(&self, fixture: Fixture) -> Option<&str> {
        match fixture {
            Fixture::Ontology => self.ontology_id.as_deref(),
            Fixture::Pipeline => self.pipeline_id.as_deref(),
            Fixture::ExtractionJob => self.extraction_job_id.as_deref(),
            Fixture::Twin => self.twin_id.as_deref(),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        [Fixture::Ontology, Fixture::Pipeline, Fixture::ExtractionJob, Fixture::Twin]
            .into_iter()
            .find(|f| f.key() == key)
            .and_then(|f| self.id(f))
    }

    /// Fixtures from `required` that were not provisioned
    pub fn missing(&self, required: &[Fixture]) -> Vec<Fixture> {
        required.iter().copied().filter(|f| self.id(*f).is_none()).collect()
    }

    /// Replace `{{ key }}` placeholders with fixture ids
    pub fn render(&self, template: &str) -> E2eResult<String> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match self.lookup(key) {
                Some(id) => id.to_string(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(key) => Err(E2eError::MissingFixture(key)),
            None => Ok(rendered.into_owned()),
        }
    }
}

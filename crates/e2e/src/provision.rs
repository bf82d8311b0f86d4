//! Test-data provisioning
//!
//! Makes sure prerequisite backend resources exist before a test runs. The
//! first existing resource is reused; otherwise one is created. Failures are
//! never raised: they come back as [`Provisioned::Unavailable`] so the test
//! can decide to skip.
//!
//! Two workers racing on an empty collection may both create a resource.
//! Nothing is cleaned up afterwards.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::error::E2eResult;
use crate::fixture::{FixtureContext, FixtureRequest};

/// Minimal ontology accepted by the ontology upload handler
const SEED_ONTOLOGY_TTL: &str = r#"@prefix : <http://mimir-aip.io/e2e#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .

:Organization a owl:Class ; rdfs:label "Organization" .
:Person a owl:Class ; rdfs:label "Person" .
:worksFor a owl:ObjectProperty ; rdfs:domain :Person ; rdfs:range :Organization .
"#;

pub const SEED_ONTOLOGY_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Ontology,
    Pipeline,
    ExtractionJob,
    Twin,
}

impl ResourceKind {
    /// Collection path under the API prefix. The ontology collection is singular.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Ontology => "ontology",
            ResourceKind::Pipeline => "pipelines",
            ResourceKind::ExtractionJob => "extraction/jobs",
            ResourceKind::Twin => "twins",
        }
    }

    /// Resource-specific id field used by the v1 handlers
    pub fn id_field(&self) -> &'static str {
        match self {
            ResourceKind::Ontology => "ontology_id",
            ResourceKind::Pipeline => "pipeline_id",
            ResourceKind::ExtractionJob => "job_id",
            ResourceKind::Twin => "twin_id",
        }
    }

    /// Key some list handlers nest their items under
    fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Ontology => "ontologies",
            ResourceKind::Pipeline => "pipelines",
            ResourceKind::ExtractionJob => "jobs",
            ResourceKind::Twin => "twins",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ResourceKind::Ontology => "ontology",
            ResourceKind::Pipeline => "pipeline",
            ResourceKind::ExtractionJob => "extraction job",
            ResourceKind::Twin => "digital twin",
        }
    }
}

/// Where to look for an id in a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRule {
    /// `{ "<field>": ... }`
    TopLevel(&'static str),
    /// `{ "<outer>": { "<field>": ... } }`
    Nested(&'static str, &'static str),
}

impl IdRule {
    fn apply(&self, body: &Value) -> Option<String> {
        let value = match self {
            IdRule::TopLevel(field) => body.get(field),
            IdRule::Nested(outer, field) => body.get(outer).and_then(|inner| inner.get(field)),
        }?;
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Extracts a resource id from the response shapes the backend produces.
///
/// Rules are tried in order:
/// 1. `<resource>_id` at the top level: current v1 handlers.
/// 2. `data.<resource>_id`: handlers that wrap replies in a `data` envelope.
/// 3. `id` at the top level: generic CRUD handlers and list items.
/// 4. `data.id`: enveloped generic handlers.
#[derive(Debug, Clone)]
pub struct IdDecoder {
    rules: Vec<IdRule>,
}

impl IdDecoder {
    pub fn for_field(field: &'static str) -> Self {
        Self {
            rules: vec![
                IdRule::TopLevel(field),
                IdRule::Nested("data", field),
                IdRule::TopLevel("id"),
                IdRule::Nested("data", "id"),
            ],
        }
    }

    pub fn for_kind(kind: ResourceKind) -> Self {
        Self::for_field(kind.id_field())
    }

    pub fn decode(&self, body: &Value) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.apply(body))
    }
}

/// Items of a list response: a bare array, `{data: [...]}`,
/// `{data: {<plural>: [...]}}` or `{<plural>: [...]}`
fn collection_items<'a>(body: &'a Value, plural: &str) -> Option<&'a Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("data")
            .and_then(|data| data.as_array().or_else(|| data.get(plural).and_then(Value::as_array)))
            .or_else(|| map.get(plural).and_then(Value::as_array)),
        _ => None,
    }
}

/// Outcome of an ensure call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// An existing resource was reused
    Existing(String),
    /// A new resource was created
    Created(String),
    /// Nothing usable; the reason is for diagnostics only
    Unavailable(String),
}

impl Provisioned {
    pub fn id(&self) -> Option<&str> {
        match self {
            Provisioned::Existing(id) | Provisioned::Created(id) => Some(id),
            Provisioned::Unavailable(_) => None,
        }
    }

    pub fn into_id(self) -> Option<String> {
        match self {
            Provisioned::Existing(id) | Provisioned::Created(id) => Some(id),
            Provisioned::Unavailable(_) => None,
        }
    }
}

pub struct Provisioner {
    api: ApiClient,
}

impl Provisioner {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn stamp() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub async fn ensure_ontology(&self) -> Provisioned {
        let payload = json!({
            "name": format!("E2E Test Ontology {}", Self::stamp()),
            "description": "Seeded by the E2E suite",
            "version": SEED_ONTOLOGY_VERSION,
            "format": "turtle",
            "ontology_data": SEED_ONTOLOGY_TTL,
        });
        self.ensure(ResourceKind::Ontology, payload).await
    }

    pub async fn ensure_pipeline(&self) -> Provisioned {
        let payload = json!({
            "name": format!("E2E Test Pipeline {}", Self::stamp()),
            "description": "Seeded by the E2E suite",
            "enabled": false,
            "steps": [],
        });
        self.ensure(ResourceKind::Pipeline, payload).await
    }

    pub async fn ensure_extraction_job(&self, ontology_id: &str) -> Provisioned {
        let payload = json!({
            "ontology_id": ontology_id,
            "job_name": format!("E2E Extraction Job {}", Self::stamp()),
            "extraction_type": "deterministic",
            "source_type": "text",
            "data": { "text": "Jane Doe works for Acme Corporation." },
        });
        self.ensure(ResourceKind::ExtractionJob, payload).await
    }

    pub async fn ensure_twin(&self, ontology_id: &str) -> Provisioned {
        let payload = json!({
            "ontology_id": ontology_id,
            "name": format!("E2E Test Twin {}", Self::stamp()),
            "description": "Seeded by the E2E suite",
        });
        self.ensure(ResourceKind::Twin, payload).await
    }

    async fn ensure(&self, kind: ResourceKind, payload: Value) -> Provisioned {
        match self.try_ensure(kind, &payload).await {
            Ok(outcome) => {
                if let Provisioned::Unavailable(reason) = &outcome {
                    warn!("No {} available: {}", kind.label(), reason);
                }
                outcome
            }
            Err(e) => {
                warn!("Failed to provision {}: {}", kind.label(), e);
                Provisioned::Unavailable(e.to_string())
            }
        }
    }

    async fn try_ensure(&self, kind: ResourceKind, payload: &Value) -> E2eResult<Provisioned> {
        let decoder = IdDecoder::for_kind(kind);

        let listing = self.api.get(kind.collection()).await?;
        if listing.is_success() {
            // Skip items without a usable id
            let existing = collection_items(&listing.body, kind.plural())
                .and_then(|items| items.iter().find_map(|item| decoder.decode(item)));
            if let Some(id) = existing {
                debug!("Reusing {} {}", kind.label(), id);
                return Ok(Provisioned::Existing(id));
            }
        } else {
            debug!("Listing {} returned {}", kind.collection(), listing.status);
        }

        let created = self.api.post(kind.collection(), payload).await?;
        if !created.is_success() {
            return Ok(Provisioned::Unavailable(format!(
                "create returned status {}",
                created.status
            )));
        }

        match decoder.decode(&created.body) {
            Some(id) => {
                info!("Created {} {}", kind.label(), id);
                Ok(Provisioned::Created(id))
            }
            None => Ok(Provisioned::Unavailable("create response carried no id".to_string())),
        }
    }

    /// Provision what `request` asks for. Extraction jobs and twins need an
    /// ontology and are skipped without one.
    pub async fn setup_test_data(&self, request: FixtureRequest) -> FixtureContext {
        let mut context = FixtureContext::default();

        if request.ontology || request.extraction_job || request.twin {
            context.ontology_id = self.ensure_ontology().await.into_id();
        }

        if request.pipeline {
            context.pipeline_id = self.ensure_pipeline().await.into_id();
        }

        if let Some(ontology_id) = context.ontology_id.clone() {
            if request.extraction_job {
                context.extraction_job_id = self.ensure_extraction_job(&ontology_id).await.into_id();
            }
            if request.twin {
                context.twin_id = self.ensure_twin(&ontology_id).await.into_id();
            }
        } else if request.extraction_job || request.twin {
            warn!("No ontology available; dependent fixtures not provisioned");
        }

        context
    }
}

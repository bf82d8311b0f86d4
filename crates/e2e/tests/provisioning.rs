//! Provisioner behaviour against a mock backend

mod support;

use chrono::Utc;
use serde_json::json;

use mimir_e2e::fixture::FixtureRequest;
use mimir_e2e::provision::{Provisioned, Provisioner};
use support::MockBackend;

#[tokio::test]
async fn ensure_ontology_on_empty_collection_posts_once() {
    let backend = MockBackend::start().await;
    backend.set_create("ontology", 201, json!({ "ontology_id": "ont-42" }));
    let provisioner = Provisioner::new(backend.client());

    let before = Utc::now().timestamp_millis();
    let outcome = provisioner.ensure_ontology().await;
    let after = Utc::now().timestamp_millis();

    assert_eq!(outcome, Provisioned::Created("ont-42".into()));

    let posts = backend.state.posts_to("ontology");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["version"], "1.0.0");

    let name = posts[0]["name"].as_str().unwrap();
    let stamp: i64 = name.rsplit(' ').next().unwrap().parse().unwrap();
    assert!(stamp >= before && stamp <= after, "{} not within [{}, {}]", stamp, before, after);
}

#[tokio::test]
async fn ensure_is_idempotent_against_populated_collection() {
    let backend = MockBackend::start().await;
    backend.set_listing(
        "pipelines",
        200,
        json!({ "data": [{ "pipeline_id": "p-1" }, { "pipeline_id": "p-2" }] }),
    );
    let provisioner = Provisioner::new(backend.client());

    let first = provisioner.ensure_pipeline().await;
    let second = provisioner.ensure_pipeline().await;

    assert_eq!(first, Provisioned::Existing("p-1".into()));
    assert_eq!(first.id(), second.id());
    assert!(backend.state.posts_to("pipelines").is_empty());
}

#[tokio::test]
async fn created_resource_is_reused_on_next_call() {
    let backend = MockBackend::start().await;
    backend.set_create("pipelines", 201, json!({ "pipeline_id": "fresh" }));
    let provisioner = Provisioner::new(backend.client());

    let first = provisioner.ensure_pipeline().await;
    let second = provisioner.ensure_pipeline().await;

    assert_eq!(first, Provisioned::Created("fresh".into()));
    assert_eq!(second, Provisioned::Existing("fresh".into()));
    assert_eq!(backend.state.posts_to("pipelines").len(), 1);
}

#[tokio::test]
async fn enveloped_create_response_is_decoded() {
    let backend = MockBackend::start().await;
    backend.set_create("pipelines", 200, json!({ "data": { "pipeline_id": "x" } }));
    let provisioner = Provisioner::new(backend.client());

    assert_eq!(provisioner.ensure_pipeline().await.id(), Some("x"));
}

#[tokio::test]
async fn failed_listing_falls_through_to_create() {
    let backend = MockBackend::start().await;
    backend.set_listing("ontology", 500, json!({ "error": "db down" }));
    backend.set_create("ontology", 201, json!({ "id": "ont-new" }));
    let provisioner = Provisioner::new(backend.client());

    assert_eq!(provisioner.ensure_ontology().await, Provisioned::Created("ont-new".into()));
}

#[tokio::test]
async fn failed_create_is_unavailable_not_an_error() {
    let backend = MockBackend::start().await;
    backend.set_create("ontology", 422, json!({ "error": "invalid turtle" }));
    let provisioner = Provisioner::new(backend.client());

    let outcome = provisioner.ensure_ontology().await;

    assert!(matches!(outcome, Provisioned::Unavailable(ref reason) if reason.contains("422")));
    assert_eq!(outcome.id(), None);
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    let backend = MockBackend::start().await;
    let client = backend.client();
    drop(backend);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let outcome = Provisioner::new(client).ensure_pipeline().await;
    assert!(matches!(outcome, Provisioned::Unavailable(_)));
}

#[tokio::test]
async fn extraction_job_is_created_for_the_ontology() {
    let backend = MockBackend::start().await;
    backend.set_listing("ontology", 200, json!([{ "ontology_id": "ont-1" }]));
    backend.set_create("extraction/jobs", 201, json!({ "job_id": "job-9" }));
    let provisioner = Provisioner::new(backend.client());

    let context = provisioner
        .setup_test_data(FixtureRequest {
            extraction_job: true,
            ..Default::default()
        })
        .await;

    assert_eq!(context.ontology_id.as_deref(), Some("ont-1"));
    assert_eq!(context.extraction_job_id.as_deref(), Some("job-9"));
    assert_eq!(context.pipeline_id, None);

    let posts = backend.state.posts_to("extraction/jobs");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["ontology_id"], "ont-1");
}

#[tokio::test]
async fn setup_defaults_to_ontology_only() {
    let backend = MockBackend::start().await;
    backend.set_listing("ontology", 200, json!([{ "id": "ont-1" }]));
    let provisioner = Provisioner::new(backend.client());

    let context = provisioner.setup_test_data(FixtureRequest::default()).await;

    assert_eq!(context.ontology_id.as_deref(), Some("ont-1"));
    assert!(context.pipeline_id.is_none());
    assert!(context.extraction_job_id.is_none());
    assert!(context.twin_id.is_none());
    assert!(backend.state.posts.lock().is_empty());
}

#[tokio::test]
async fn dependent_fixtures_skipped_without_ontology() {
    let backend = MockBackend::start().await;
    backend.set_create("ontology", 500, json!({ "error": "nope" }));
    let provisioner = Provisioner::new(backend.client());

    let context = provisioner
        .setup_test_data(FixtureRequest {
            twin: true,
            extraction_job: true,
            ..Default::default()
        })
        .await;

    assert!(context.ontology_id.is_none());
    assert!(context.twin_id.is_none());
    assert!(context.extraction_job_id.is_none());
    assert!(backend.state.posts_to("twins").is_empty());
    assert!(backend.state.posts_to("extraction/jobs").is_empty());
}

#[tokio::test]
async fn listing_item_without_id_is_passed_over() {
    let backend = MockBackend::start().await;
    backend.set_listing(
        "twins",
        200,
        json!([{ "name": "legacy twin" }, { "twin_id": "twin-2", "name": "plant" }]),
    );
    let provisioner = Provisioner::new(backend.client());

    let outcome = provisioner.ensure_twin("ont-1").await;

    assert_eq!(outcome, Provisioned::Existing("twin-2".into()));
    assert!(backend.state.posts_to("twins").is_empty());
}

#[tokio::test]
async fn idless_listing_creates_only_once() {
    let backend = MockBackend::start().await;
    backend.set_listing("pipelines", 200, json!([{ "name": "imported" }]));
    backend.set_create("pipelines", 201, json!({ "pipeline_id": "p-new" }));
    let provisioner = Provisioner::new(backend.client());

    let first = provisioner.ensure_pipeline().await;
    let second = provisioner.ensure_pipeline().await;

    assert_eq!(first, Provisioned::Created("p-new".into()));
    assert_eq!(second, Provisioned::Existing("p-new".into()));
    assert_eq!(backend.state.posts_to("pipelines").len(), 1);
}

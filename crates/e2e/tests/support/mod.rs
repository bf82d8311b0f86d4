//! In-process mock of the Mimir backend for provisioning and API tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use mimir_e2e::api::{ApiClient, ApiConfig};

#[derive(Default)]
pub struct MockState {
    /// Body returned by `GET /api/v1/<collection>`; missing means `[]`
    pub listings: Mutex<HashMap<String, (u16, Value)>>,
    /// Reply to `POST /api/v1/<collection>`; missing means 201 `{"id": "created-<n>"}`
    pub creates: Mutex<HashMap<String, (u16, Value)>>,
    /// Every POST received, as (collection, body)
    pub posts: Mutex<Vec<(String, Value)>>,
    /// Every DELETE received, as the item path under `/api/v1/`
    pub deletes: Mutex<Vec<String>>,
    pub login_status: Mutex<u16>,
    pub healthy: Mutex<bool>,
}

impl MockState {
    pub fn posts_to(&self, collection: &str) -> Vec<Value> {
        self.posts
            .lock()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        *state.login_status.lock() = 404;
        *state.healthy.lock() = true;

        let app = Router::new()
            .route("/health", get(health))
            .route("/api/v1/auth/login", post(login))
            .route("/api/v1/tools/execute", post(execute_tool))
            .route("/api/v1/*collection", get(list).post(create).put(update).delete(remove))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr: SocketAddr = listener.local_addr().expect("Failed to get local address");
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Mock backend error");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            shutdown: Some(shutdown),
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(ApiConfig {
            base_url: self.base_url.clone(),
            ..Default::default()
        })
        .expect("Failed to build API client")
    }

    pub fn set_listing(&self, collection: &str, status: u16, body: Value) {
        self.state.listings.lock().insert(collection.to_string(), (status, body));
    }

    pub fn set_create(&self, collection: &str, status: u16, body: Value) {
        self.state.creates.lock().insert(collection.to_string(), (status, body));
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn reply(status: u16, body: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(body))
}

async fn health(State(state): State<Arc<MockState>>) -> (StatusCode, Json<Value>) {
    if *state.healthy.lock() {
        reply(200, json!({ "status": "healthy" }))
    } else {
        reply(503, json!({ "status": "unhealthy" }))
    }
}

async fn login(State(state): State<Arc<MockState>>, Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    let status = *state.login_status.lock();
    if status == 200 {
        reply(200, json!({ "token": "mock-token" }))
    } else {
        reply(status, json!({ "error": "authentication disabled" }))
    }
}

async fn execute_tool(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let tool = body["tool_name"].as_str().unwrap_or_default().to_string();
    if tool == "Broken.tool" {
        return reply(200, json!({ "success": false, "error": "tool exploded" }));
    }
    reply(200, json!({ "success": true, "result": { "tool": tool, "input": body["input"] } }))
}

/// Splits `pipelines/p-1` into the parent listing and the index of the item
/// carrying that id, when the parent listing exists
fn find_item(listings: &HashMap<String, (u16, Value)>, path: &str) -> Option<(String, Option<usize>)> {
    let (parent, id) = path.rsplit_once('/')?;
    let (_, body) = listings.get(parent)?;
    let items = body.as_array()?;
    let index = items.iter().position(|item| {
        item.as_object()
            .map_or(false, |fields| fields.values().any(|v| v.as_str() == Some(id)))
    });
    Some((parent.to_string(), index))
}

async fn list(State(state): State<Arc<MockState>>, Path(collection): Path<String>) -> (StatusCode, Json<Value>) {
    let listings = state.listings.lock();
    if let Some((status, body)) = listings.get(&collection) {
        return reply(*status, body.clone());
    }
    match find_item(&listings, &collection) {
        Some((parent, Some(index))) => reply(200, listings[&parent].1[index].clone()),
        Some((_, None)) => reply(404, json!({ "error": "not found" })),
        None => reply(200, json!([])),
    }
}

async fn update(
    State(state): State<Arc<MockState>>,
    Path(path): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut listings = state.listings.lock();
    let Some((parent, Some(index))) = find_item(&listings, &path) else {
        return reply(404, json!({ "error": "not found" }));
    };
    let Some(item) = listings.get_mut(&parent).and_then(|(_, list)| list.get_mut(index)) else {
        return reply(404, json!({ "error": "not found" }));
    };
    if let (Some(fields), Some(changes)) = (item.as_object_mut(), body.as_object()) {
        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }
    }
    reply(200, item.clone())
}

async fn remove(State(state): State<Arc<MockState>>, Path(path): Path<String>) -> (StatusCode, Json<Value>) {
    state.deletes.lock().push(path.clone());
    let mut listings = state.listings.lock();
    let Some((parent, Some(index))) = find_item(&listings, &path) else {
        return reply(404, json!({ "error": "not found" }));
    };
    if let Some(items) = listings.get_mut(&parent).and_then(|(_, list)| list.as_array_mut()) {
        items.remove(index);
    }
    reply(200, json!({ "deleted": path }))
}

async fn create(
    State(state): State<Arc<MockState>>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let count = {
        let mut posts = state.posts.lock();
        posts.push((collection.clone(), body));
        posts.len()
    };

    let (status, response) = state
        .creates
        .lock()
        .get(&collection)
        .cloned()
        .unwrap_or((201, json!({ "id": format!("created-{}", count) })));

    // A successful create shows up in later listings, like the real backend.
    if (200..300).contains(&status) {
        let mut listings = state.listings.lock();
        let entry = listings.entry(collection).or_insert((200, json!([])));
        if let Some(items) = entry.1.as_array_mut() {
            items.push(response.clone());
        }
    }

    reply(status, response)
}

use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::protocol::API_PREFIX;
use shared::types::Service;

use crate::catalog;
use crate::id::parse_id;
use crate::registry::{Registry, RegistryError};
use crate::store::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub base_path: String,
    pub backend: String,
}

#[derive(Deserialize)]
pub struct ServiceQuery {
    pub name: Option<String>,
    pub group: Option<String>,
    /// `true` keeps only active endpoints, `false` keeps the rest
    pub active: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/config", get(get_config))
        .route("/services", get(get_services))
        .route("/services/hash", get(get_hash))
        .route("/services/id/:id", get(get_service_by_id))
        .route("/services/:name/:address/activate", post(activate))
        .route("/services/:name/:address/deactivate", post(deactivate))
        .route("/services/:name/:address/metadata", put(update_metadata));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

fn status_for(e: &RegistryError) -> StatusCode {
    match e {
        RegistryError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        RegistryError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
        RegistryError::Parse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn to_status(e: RegistryError) -> StatusCode {
    let status = status_for(&e);
    if status.is_server_error() {
        tracing::error!("Registry request failed: {}", e);
    } else {
        tracing::debug!("Registry request rejected: {}", e);
    }
    status
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        base_path: state.registry.base_path().to_string(),
        backend: state.registry.backend().to_string(),
    })
}

async fn get_services(
    State(state): State<AppState>,
    Query(params): Query<ServiceQuery>,
) -> Json<Vec<Service>> {
    let services = state
        .registry
        .fetch_services()
        .await
        .into_iter()
        .filter(|s| params.name.as_ref().map_or(true, |name| &s.name == name))
        .filter(|s| params.group.as_ref().map_or(true, |group| &s.group == group))
        .filter(|s| params.active.map_or(true, |active| s.is_active() == active))
        .collect();

    Json(services)
}

async fn get_hash(State(state): State<AppState>) -> String {
    catalog::compute_hash(&state.registry.fetch_services().await)
}

async fn get_service_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Service>, StatusCode> {
    let (name, address) = parse_id(&id).map_err(|e| {
        tracing::debug!("Rejected service id {}: {}", id, e);
        StatusCode::BAD_REQUEST
    })?;

    state
        .registry
        .fetch_services()
        .await
        .into_iter()
        .find(|s| s.name == name && s.address == address)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn activate(
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    state
        .registry
        .activate_service(&name, &address)
        .await
        .map_err(to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deactivate(
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    state
        .registry
        .deactivate_service(&name, &address)
        .await
        .map_err(to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_metadata(
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
    body: String,
) -> Result<StatusCode, StatusCode> {
    state
        .registry
        .update_metadata(&name, &address, &body)
        .await
        .map_err(to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::id::encode_id;
    use crate::store::memory::ContendedStore;
    use crate::store::{KvStore, MemoryStore, WriteOptions};

    const ORDER_KEY: &str = "com/gh/orderSvc/10.0.0.5:8080";

    async fn test_app() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .put(ORDER_KEY, b"state=active&group=us-east", WriteOptions::default())
            .await
            .unwrap();
        store
            .put("com/gh/userSvc/10.0.0.7:9090", b"group=eu", WriteOptions::default())
            .await
            .unwrap();

        let registry = Arc::new(Registry::new(store.clone(), "com/gh"));
        (router(AppState { registry }), store)
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_list_services() {
        let (app, _) = test_app().await;

        let (status, body) = send(app, Method::GET, "/v1/services", "").await;
        let services: Vec<Service> = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(services.len(), 2);
    }

    #[tokio::test]
    async fn test_list_services_by_group() {
        let (app, _) = test_app().await;

        let (_, body) = send(app, Method::GET, "/v1/services?group=us-east", "").await;
        let services: Vec<Service> = serde_json::from_slice(&body).unwrap();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "orderSvc");
    }

    #[tokio::test]
    async fn test_deactivate_then_list() {
        let (app, _) = test_app().await;

        let (status, _) = send(
            app.clone(),
            Method::POST,
            "/v1/services/orderSvc/10.0.0.5:8080/deactivate",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(app, Method::GET, "/v1/services?name=orderSvc", "").await;
        let services: Vec<Service> = serde_json::from_slice(&body).unwrap();
        assert_eq!(services[0].state, "inactive");
        assert_eq!(services[0].group, "us-east");
    }

    #[tokio::test]
    async fn test_activate_unknown_endpoint() {
        let (app, _) = test_app().await;

        let (status, _) = send(app, Method::POST, "/v1/services/nope/1.2.3.4:1/activate", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deactivate_malformed_value() {
        let (app, store) = test_app().await;
        store
            .put(ORDER_KEY, b"group=%", WriteOptions::default())
            .await
            .unwrap();

        let (status, _) = send(
            app,
            Method::POST,
            "/v1/services/orderSvc/10.0.0.5:8080/deactivate",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let (app, store) = test_app().await;

        let (status, _) = send(
            app,
            Method::PUT,
            "/v1/services/orderSvc/10.0.0.5:8080/metadata",
            "state=inactive&group=us-west",
        )
        .await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        let stored = store.get(ORDER_KEY).await.unwrap();
        assert_eq!(stored.value, b"state=inactive&group=us-west".to_vec());
    }

    #[tokio::test]
    async fn test_service_by_id() {
        let (app, _) = test_app().await;
        let id = encode_id("orderSvc", "10.0.0.5:8080");

        let (status, body) = send(app.clone(), Method::GET, &format!("/v1/services/id/{}", id), "").await;
        let service: Service = serde_json::from_slice(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(service.address, "10.0.0.5:8080");

        let missing = encode_id("orderSvc", "10.0.0.99:8080");
        let (status, _) = send(app.clone(), Method::GET, &format!("/v1/services/id/{}", missing), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, Method::GET, "/v1/services/id/not-base64!", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_hash_tracks_state() {
        let (app, _) = test_app().await;

        let (_, before) = send(app.clone(), Method::GET, "/v1/services/hash", "").await;
        send(
            app.clone(),
            Method::POST,
            "/v1/services/orderSvc/10.0.0.5:8080/deactivate",
            "",
        )
        .await;
        let (_, after) = send(app, Method::GET, "/v1/services/hash", "").await;

        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_config() {
        let (app, _) = test_app().await;

        let (_, body) = send(app, Method::GET, "/v1/config", "").await;
        let config: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(config["base_path"], "com/gh");
        assert_eq!(config["backend"], "memory");
    }

    #[tokio::test]
    async fn test_list_services_by_activity() {
        let (app, _) = test_app().await;

        // userSvc has no state field and counts as active
        let (_, body) = send(app.clone(), Method::GET, "/v1/services?active=false", "").await;
        let inactive: Vec<Service> = serde_json::from_slice(&body).unwrap();
        assert!(inactive.is_empty());

        send(
            app.clone(),
            Method::POST,
            "/v1/services/orderSvc/10.0.0.5:8080/deactivate",
            "",
        )
        .await;

        let (_, body) = send(app.clone(), Method::GET, "/v1/services?active=false", "").await;
        let inactive: Vec<Service> = serde_json::from_slice(&body).unwrap();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].name, "orderSvc");

        let (_, body) = send(app, Method::GET, "/v1/services?active=true", "").await;
        let active: Vec<Service> = serde_json::from_slice(&body).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "userSvc");
        assert!(active[0].is_active());
    }

    #[tokio::test]
    async fn test_concurrent_write_reports_conflict() {
        let store = Arc::new(ContendedStore::new());
        store
            .put(ORDER_KEY, b"state=active&group=us-east", WriteOptions::default())
            .await
            .unwrap();
        let registry = Arc::new(Registry::new(store.clone(), "com/gh"));
        let app = router(AppState { registry });

        let (status, _) = send(
            app,
            Method::POST,
            "/v1/services/orderSvc/10.0.0.5:8080/deactivate",
            "",
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        let stored = store.get(ORDER_KEY).await.unwrap();
        assert_eq!(stored.value, b"state=active&group=us-east&touched=1".to_vec());
    }
}

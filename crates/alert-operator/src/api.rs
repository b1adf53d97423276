//! HTTP API over the Alert and Silence stores of the operator's namespace.
//!
//! Alerts are read-only. Silences may be created, updated, and deleted,
//! which the silence reconciler then applies to the silence service.
use crate::controllers::validate_spec;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use models::{Alert, ObjectKey, Resource, Silence, SilenceSpec};
use std::sync::Arc;
use store::Store;

struct App {
    namespace: String,
    alerts: Arc<dyn Store<Alert>>,
    silences: Arc<dyn Store<Silence>>,
}

/// Build the API router.
pub fn build_router(
    namespace: String,
    alerts: Arc<dyn Store<Alert>>,
    silences: Arc<dyn Store<Silence>>,
) -> axum::Router<()> {
    let app = Arc::new(App {
        namespace,
        alerts,
        silences,
    });

    use axum::routing::get;

    axum::Router::new()
        .route("/alerts", get(list_alerts))
        .route("/silences", get(list_silences))
        .route(
            "/silences/:name",
            get(get_silence).put(put_silence).delete(delete_silence),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

/// An error response, which wraps an `anyhow::Error` with an HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    pub status: StatusCode,
    #[source]
    pub error: anyhow::Error,
}

impl From<store::Error> for ApiError {
    fn from(err: store::Error) -> Self {
        let status = match &err {
            store::Error::NotFound { .. } => StatusCode::NOT_FOUND,
            store::Error::AlreadyExists { .. } | store::Error::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            store::Error::Invalid { .. } => StatusCode::BAD_REQUEST,
        };
        ApiError {
            status,
            error: err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": format!("{:#}", self.error) });
        (self.status, Json(body)).into_response()
    }
}

async fn list_alerts(State(app): State<Arc<App>>) -> Result<Json<Vec<Alert>>, ApiError> {
    Ok(Json(app.alerts.list(&app.namespace).await?))
}

async fn list_silences(State(app): State<Arc<App>>) -> Result<Json<Vec<Silence>>, ApiError> {
    Ok(Json(app.silences.list(&app.namespace).await?))
}

async fn get_silence(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> Result<Json<Silence>, ApiError> {
    let key = ObjectKey::new(&app.namespace, name);
    Ok(Json(app.silences.get(&key).await?))
}

/// Create or replace the spec of a Silence.
async fn put_silence(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
    Json(spec): Json<SilenceSpec>,
) -> Result<(StatusCode, Json<Silence>), ApiError> {
    if let Err(reason) = validate_spec(&spec, chrono::Utc::now()) {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(reason),
        });
    }

    let (silence, op) = store::create_or_update(
        app.silences.as_ref(),
        Silence::new(&app.namespace, &name, spec.clone()),
        |silence: &mut Silence| silence.spec = spec,
    )
    .await?;

    tracing::info!(key = %silence.key(), ?op, "applied silence");

    let status = match op {
        store::Operation::Created => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(silence)))
}

async fn delete_silence(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key = ObjectKey::new(&app.namespace, name);
    app.silences.delete(&key).await?;

    tracing::info!(%key, "requested deletion of silence");
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod test {
    use super::*;
    use axum::body::Body;
    use store::MemoryStore;
    use tower::ServiceExt;

    async fn call(
        router: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_silence_lifecycle() {
        let alerts = MemoryStore::<Alert>::new();
        let silences = MemoryStore::<Silence>::new();
        let router = build_router(
            "monitoring".to_string(),
            Arc::new(alerts),
            Arc::new(silences.clone()),
        );

        let starts_at = chrono::Utc::now();
        let ends_at = starts_at + chrono::Duration::hours(2);
        let spec = serde_json::json!({
            "comment": "maintenance",
            "startsAt": starts_at,
            "endsAt": ends_at,
            "matchLabels": {"cluster": "east"},
        });

        let (status, body) = call(&router, "PUT", "/silences/maint", Some(spec.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["metadata"]["namespace"], "monitoring");
        assert_eq!(body["spec"]["matchLabels"]["cluster"], "east");

        let (status, _) = call(&router, "PUT", "/silences/maint", Some(spec)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&router, "GET", "/silences", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = call(&router, "DELETE", "/silences/maint", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = call(&router, "GET", "/silences/maint", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        assert!(silences.is_empty());

        let (status, body) = call(&router, "GET", "/alerts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_invalid_silences_are_rejected() {
        let router = build_router(
            "monitoring".to_string(),
            Arc::new(MemoryStore::<Alert>::new()),
            Arc::new(MemoryStore::<Silence>::new()),
        );

        let (status, body) = call(
            &router,
            "PUT",
            "/silences/bad",
            Some(serde_json::json!({
                "startsAt": "2024-05-01T10:00:00Z",
                "endsAt": "2024-05-01T09:00:00Z",
                "matchLabels": {"cluster": "east"},
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("endsAt"));
    }
}

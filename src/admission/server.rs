//! Admission Webhook Server
//!
//! Serves the mutating endpoint over HTTPS.

use super::mutator::AdmissionMutator;
use super::review::{AdmissionResponse, AdmissionReview};
use crate::error::{Error, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Path the API server posts claim reviews to
pub const MUTATE_PATH: &str = "/mutating-pvc";

/// Time allowed for in-flight requests once shutdown starts
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(10);

/// Build the webhook router
pub fn router(mutator: Arc<AdmissionMutator>, request_timeout: Duration) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate_claim))
        .route("/healthz", get(health_check))
        .route("/metrics", get(scrape_metrics))
        .with_state(mutator)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

async fn mutate_claim(
    State(mutator): State<Arc<AdmissionMutator>>,
    body: Bytes,
) -> Json<AdmissionReview> {
    match serde_json::from_slice::<AdmissionReview>(&body) {
        Ok(review) => Json(mutator.review(review).await),
        Err(e) => {
            warn!("Cannot decode admission review: {}", e);
            Json(AdmissionReview::from_response(AdmissionResponse::deny(
                "",
                e.to_string(),
            )))
        }
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn scrape_metrics(State(mutator): State<Arc<AdmissionMutator>>) -> Response {
    match mutator.metrics().render() {
        Ok((content_type, buffer)) => ([(header::CONTENT_TYPE, content_type)], buffer).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Load the serving certificate and key
pub async fn load_tls(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
        Error::Configuration(format!(
            "Cannot load TLS material ({}, {}): {}",
            cert.display(),
            key.display(),
            e
        ))
    })
}

/// Serve over TLS until `shutdown` fires
pub async fn serve(
    addr: SocketAddr,
    tls: RustlsConfig,
    app: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let handle = axum_server::Handle::new();

    let signal = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        info!("Webhook server shutting down");
        signal.graceful_shutdown(Some(GRACEFUL_SHUTDOWN));
    });

    info!("Webhook listening on https://{}{}", addr, MUTATE_PATH);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::Internal(format!("Webhook server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::selector::DefaultSelectors;
    use crate::admission::strategy::SelectionMethod;
    use crate::metrics::Metrics;
    use crate::resources::LOCAL_PROVISIONER;
    use crate::testing::{node_with_labels, storage_class, FakeCluster};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> Router {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_storage_class(storage_class("local", LOCAL_PROVISIONER));
        cluster.add_node(node_with_labels("worker-1", &[], Some(1 << 30)));
        let mutator = AdmissionMutator::new(
            cluster,
            SelectionMethod::RoundRobin.build(Vec::new()),
            None,
            DefaultSelectors::empty(),
            Arc::new(Metrics::new().unwrap()),
        );
        router(Arc::new(mutator), Duration::from_secs(5))
    }

    async fn post_body(body: Vec<u8>) -> serde_json::Value {
        let response = app()
            .oneshot(
                Request::post(MUTATE_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_mutate_endpoint() {
        let review = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "7f0b",
                "object": {
                    "metadata": { "name": "data", "namespace": "apps" },
                    "spec": { "storageClassName": "local" }
                }
            }
        });
        let answer = post_body(serde_json::to_vec(&review).unwrap()).await;
        assert_eq!(answer["response"]["uid"], "7f0b");
        assert_eq!(answer["response"]["allowed"], true);
        assert_eq!(answer["response"]["patchType"], "JSONPatch");
    }

    #[tokio::test]
    async fn test_undecodable_body_is_denied() {
        let answer = post_body(b"not a review".to_vec()).await;
        assert_eq!(answer["response"]["allowed"], false);
        assert!(answer["response"]["status"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_count_reviews() {
        let app = app();
        let review = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "1",
                "object": {
                    "metadata": { "name": "data", "namespace": "apps" },
                    "spec": { "storageClassName": "local" }
                }
            }
        });
        app.clone()
            .oneshot(
                Request::post(MUTATE_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&review).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(
            text.contains("localpv_admission_reviews_total{result=\"mutated\"} 1"),
            "{}",
            text
        );
    }
}

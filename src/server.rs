use crate::{
    class_info::ClassCatalog,
    config::Config,
    model_service::ModelService,
    routes::{api_routes, process_routes},
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Clone)]
pub struct SharedState {
    pub model_service: Arc<dyn ModelService>,
    pub catalog: Arc<ClassCatalog>,
    pub upload_dir: Arc<Path>,
    pub min_probability: f32,
    pub metrics: Arc<Metrics>,
}

impl SharedState {
    pub fn new(
        model_service: Arc<dyn ModelService>,
        catalog: ClassCatalog,
        upload_dir: PathBuf,
        min_probability: f32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            model_service,
            catalog: Arc::new(catalog),
            upload_dir: upload_dir.into(),
            min_probability,
            metrics,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// CORS and the upload size limit only apply to `/process`.
pub fn build_router(
    state: SharedState,
    allowed_origins: &[String],
    max_upload_bytes: usize,
) -> Router {
    let process = process_routes()
        .layer(cors_layer(allowed_origins))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .merge(api_routes())
        .merge(process)
        .with_state(state)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        model_service: Arc<dyn ModelService>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        tokio::fs::create_dir_all(&config.upload.upload_dir).await?;

        let metrics = Arc::new(Metrics::new()?);
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState::new(
            model_service,
            ClassCatalog::from_config(&config.labels),
            config.upload.upload_dir.clone(),
            config.model.min_probability,
            metrics,
        );

        let router = build_router(
            app_state,
            &config.server.cors_allowed_origins,
            config.server.max_upload_bytes,
        )
        .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_service::{Detection, ModelServiceError};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tower::ServiceExt;

    const ORIGIN: &str = "http://fish-project-af275thng-nsttas-projects.vercel.app";

    struct NoopModelService {}

    #[async_trait]
    impl ModelService for NoopModelService {
        async fn predict(
            &self,
            _image_path: &Path,
            _min_probability: f32,
        ) -> Result<Vec<Detection>, ModelServiceError> {
            Ok(Vec::new())
        }
    }

    fn router() -> Router {
        let state = SharedState::new(
            Arc::new(NoopModelService {}),
            ClassCatalog::new(vec!["Fire Goby".to_string()], "unused"),
            std::env::temp_dir(),
            0.25,
            Arc::new(Metrics::new().unwrap()),
        );
        build_router(state, &[ORIGIN.to_string()], 1024)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_running() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Server is running!");
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"status":"Available"}"#);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_requests() {
        let router = router();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        router.clone().oneshot(request).await.unwrap();

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("requests_total"));
    }

    #[tokio::test]
    async fn test_process_preflight_allows_configured_origin() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/process")
            .header(header::ORIGIN, ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            ORIGIN
        );
    }

    #[tokio::test]
    async fn test_process_preflight_rejects_unknown_origin() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/process")
            .header(header::ORIGIN, "http://elsewhere.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let boundary = "limit";
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"big.jpg\"\r\n\r\n",
            boundary
        )
        .into_bytes();
        body.extend(std::iter::repeat(b'x').take(4096));
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/process")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

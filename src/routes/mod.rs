mod health;
mod metrics;
mod process;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::server_running))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}

pub fn process_routes() -> Router<SharedState> {
    Router::new().route("/process", post(process::process_image))
}

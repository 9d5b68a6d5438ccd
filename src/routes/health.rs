use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

const SERVER_RUNNING: &str = "Server is running!";

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("/health");
    Json(Status {
        status: "Available".into(),
    })
}

pub async fn server_running(State(state): State<SharedState>) -> &'static str {
    state.metrics.record_request("/");
    SERVER_RUNNING
}

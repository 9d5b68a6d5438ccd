use crate::{
    model_service::ModelServiceError,
    results::{assemble_results, ProcessResponse},
    server::SharedState,
    upload::{StoredUpload, UploadError},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const IMAGE_FIELD: &str = "image";
const ROUTE: &str = "/process";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No image file provided")]
    MissingImage,
    #[error("Multipart payload rejected: {0}")]
    Rejected(#[from] MultipartRejection),
    #[error("Multipart payload unreadable: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to save image: {0}")]
    Upload(#[from] UploadError),
    #[error("Error during prediction: {0}")]
    Prediction(#[from] ModelServiceError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ProcessError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProcessError::Multipart(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Image file too large")
            }
            ProcessError::Rejected(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Image file too large")
            }
            ProcessError::MissingImage | ProcessError::Rejected(_) | ProcessError::Multipart(_) => {
                (StatusCode::BAD_REQUEST, "No image file provided")
            }
            ProcessError::Upload(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save image"),
            ProcessError::Prediction(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Error during prediction")
            }
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }

        (
            status,
            Json(ErrorBody {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

struct ImageUpload {
    filename: String,
    data: Bytes,
}

/// Returns the first file part named `image`. Plain form fields with that
/// name do not count as an upload.
async fn read_image_field(
    mut multipart: Multipart,
) -> Result<Option<ImageUpload>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        return Ok(Some(ImageUpload { filename, data }));
    }

    Ok(None)
}

#[instrument(skip(state, multipart))]
pub async fn process_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ProcessError> {
    tracing::info!("Request received");
    state.metrics.record_request(ROUTE);

    let upload = read_image_field(multipart?)
        .await?
        .ok_or(ProcessError::MissingImage)?;

    let stored =
        StoredUpload::save(&state.upload_dir, Some(&upload.filename), &upload.data).await?;
    tracing::info!("Image successfully received and saved");

    let start = Instant::now();
    let detections = state
        .model_service
        .predict(stored.path(), state.min_probability)
        .await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);
    drop(stored);

    let response = assemble_results(&detections, &state.catalog).await;

    let processed: Vec<&str> = response
        .results
        .iter()
        .map(|result| result.class_name.as_str())
        .collect();
    tracing::info!(
        "Processed classes: {:?} from {} detections",
        processed,
        detections.len()
    );
    for class_name in processed {
        state.metrics.record_detected_class(class_name);
    }

    Ok(Json(response))
}

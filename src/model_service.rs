use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// A single box produced by the detector, in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_index: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }
}

#[derive(Error, Debug)]
pub enum ModelServiceError {
    #[error("Failed to read image {path}: {source}")]
    ReadImage {
        path: String,
        source: std::io::Error,
    },
    #[error("Image transformation error: {0}")]
    ImageTransformation(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Inference task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    /// Runs the detector over the image stored at `image_path`, keeping only
    /// boxes whose confidence reaches `min_probability`.
    async fn predict(
        &self,
        image_path: &Path,
        min_probability: f32,
    ) -> Result<Vec<Detection>, ModelServiceError>;
}

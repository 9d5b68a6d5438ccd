use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const FALLBACK_FILENAME: &str = "upload";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to write upload to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Reduces a client supplied filename to a safe single path component.
pub fn sanitize_filename(filename: &str) -> String {
    let last_component = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let sanitized: String = last_component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized.to_string()
    }
}

/// An uploaded image written to its own request scoped path. The file is
/// removed when the value is dropped.
#[derive(Debug)]
pub struct StoredUpload {
    path: PathBuf,
}

impl StoredUpload {
    pub async fn save(
        upload_dir: &Path,
        filename: Option<&str>,
        data: &[u8],
    ) -> Result<Self, UploadError> {
        let filename = sanitize_filename(filename.unwrap_or(FALLBACK_FILENAME));
        let path = upload_dir.join(format!("{}-{}", Uuid::new_v4(), filename));

        tokio::fs::write(&path, data)
            .await
            .map_err(|source| UploadError::Write {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!("Stored {} bytes at {:?}", data.len(), path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove upload {:?}: {}", self.path, e);
        }
    }
}

use crate::config::LabelsConfig;
use std::path::PathBuf;

pub const NO_INFO_AVAILABLE: &str = "No additional information available.";

/// Index-to-name table for the model's output classes together with the
/// directory of per-class description files.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    class_names: Vec<String>,
    info_dir: PathBuf,
}

impl ClassCatalog {
    pub fn new(class_names: Vec<String>, info_dir: impl Into<PathBuf>) -> Self {
        Self {
            class_names,
            info_dir: info_dir.into(),
        }
    }

    pub fn from_config(labels_config: &LabelsConfig) -> Self {
        Self::new(
            labels_config.class_names.clone(),
            labels_config.info_dir.clone(),
        )
    }

    pub fn class_name(&self, class_index: usize) -> Option<&str> {
        self.class_names.get(class_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.class_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_names.is_empty()
    }

    pub fn info_path(&self, class_name: &str) -> PathBuf {
        self.info_dir.join(format!("{}.txt", class_name))
    }

    /// Reads the description for `class_name` from disk on every call. The
    /// contents are returned verbatim; any read failure falls back to
    /// [`NO_INFO_AVAILABLE`].
    pub async fn class_info(&self, class_name: &str) -> String {
        let path = self.info_path(class_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(info) => info,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No info file for {:?} at {:?}", class_name, path);
                NO_INFO_AVAILABLE.to_string()
            }
            Err(e) => {
                tracing::warn!("Failed to read info file {:?}: {}", path, e);
                NO_INFO_AVAILABLE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CLASS_NAMES;

    fn catalog(info_dir: &std::path::Path) -> ClassCatalog {
        ClassCatalog::new(
            DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            info_dir,
        )
    }

    #[test]
    fn test_class_name_lookup_is_bounds_checked() {
        let catalog = catalog(std::path::Path::new("unused"));

        assert_eq!(catalog.len(), 10);
        assert_eq!(catalog.class_name(0), Some("Andaman damsel"));
        assert_eq!(catalog.class_name(2), Some("Clown anemonefish"));
        assert_eq!(catalog.class_name(9), Some("convict surgeonfish"));
        assert_eq!(catalog.class_name(10), None);
    }

    #[test]
    fn test_info_path_uses_class_name_verbatim() {
        let catalog = catalog(std::path::Path::new("models/name class"));
        assert_eq!(
            catalog.info_path("Red lionfish"),
            PathBuf::from("models/name class/Red lionfish.txt")
        );
    }

    #[tokio::test]
    async fn test_class_info_returns_file_contents_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let text = "  Amphiprion ocellaris\nLives among anemones.\n\n";
        std::fs::write(dir.path().join("Clown anemonefish.txt"), text).unwrap();

        let info = catalog(dir.path()).class_info("Clown anemonefish").await;

        assert_eq!(info, text);
    }

    #[tokio::test]
    async fn test_class_info_falls_back_when_missing() {
        let dir = tempfile::tempdir().unwrap();

        let info = catalog(dir.path()).class_info("Fire Goby").await;

        assert_eq!(info, NO_INFO_AVAILABLE);
    }

    #[tokio::test]
    async fn test_class_info_falls_back_on_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Fire Goby.txt"), [0xff, 0xfe, 0x00]).unwrap();

        let info = catalog(dir.path()).class_info("Fire Goby").await;

        assert_eq!(info, NO_INFO_AVAILABLE);
    }

    #[tokio::test]
    async fn test_class_info_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let path = dir.path().join("Red lionfish.txt");

        std::fs::write(&path, "first").unwrap();
        assert_eq!(catalog.class_info("Red lionfish").await, "first");

        std::fs::write(&path, "second").unwrap();
        assert_eq!(catalog.class_info("Red lionfish").await, "second");
    }
}

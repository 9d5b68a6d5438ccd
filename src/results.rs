use crate::{class_info::ClassCatalog, model_service::Detection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassResult {
    pub class_name: String,
    pub confidence: f32,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub results: Vec<ClassResult>,
}

/// Keeps the first detection of each class in model order. Detections whose
/// index falls outside the catalog are dropped, and so is every later
/// detection of a class already kept.
pub fn distinct_classes<'a>(
    detections: &[Detection],
    catalog: &'a ClassCatalog,
) -> Vec<(&'a str, f32)> {
    let mut seen = HashSet::new();
    detections
        .iter()
        .filter_map(|detection| {
            let class_name = catalog.class_name(detection.class_index)?;
            seen.insert(class_name)
                .then_some((class_name, detection.confidence))
        })
        .collect()
}

pub async fn assemble_results(
    detections: &[Detection],
    catalog: &ClassCatalog,
) -> ProcessResponse {
    let mut results = Vec::new();
    for (class_name, confidence) in distinct_classes(detections, catalog) {
        let info = catalog.class_info(class_name).await;
        results.push(ClassResult {
            class_name: class_name.to_string(),
            confidence,
            info,
        });
    }

    ProcessResponse { results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{class_info::NO_INFO_AVAILABLE, config::DEFAULT_CLASS_NAMES};

    fn detection(class_index: usize, confidence: f32) -> Detection {
        Detection {
            class_index,
            confidence,
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        }
    }

    fn catalog(info_dir: &std::path::Path) -> ClassCatalog {
        ClassCatalog::new(
            DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            info_dir,
        )
    }

    #[test]
    fn test_out_of_range_class_is_dropped() {
        let catalog = catalog(std::path::Path::new("unused"));
        let detections = vec![detection(10, 0.9), detection(4, 0.5), detection(99, 0.8)];

        let classes = distinct_classes(&detections, &catalog);

        assert_eq!(classes, vec![("Peppered butterflyfish", 0.5)]);
    }

    #[test]
    fn test_first_detection_of_class_wins() {
        let catalog = catalog(std::path::Path::new("unused"));
        let detections = vec![
            detection(5, 0.4),
            detection(1, 0.6),
            detection(5, 0.95),
            detection(1, 0.3),
        ];

        let classes = distinct_classes(&detections, &catalog);

        assert_eq!(
            classes,
            vec![("Red lionfish", 0.4), ("Blackside hawkfish", 0.6)]
        );
    }

    #[tokio::test]
    async fn test_assemble_attaches_info() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Titan triggerfish.txt"),
            "Balistoides viridescens",
        )
        .unwrap();
        let catalog = catalog(dir.path());

        let response =
            assemble_results(&[detection(8, 0.7), detection(3, 0.33)], &catalog).await;

        assert_eq!(
            response.results,
            vec![
                ClassResult {
                    class_name: "Titan triggerfish".to_string(),
                    confidence: 0.7,
                    info: "Balistoides viridescens".to_string(),
                },
                ClassResult {
                    class_name: "Fire Goby".to_string(),
                    confidence: 0.33,
                    info: NO_INFO_AVAILABLE.to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_assemble_without_detections_is_empty() {
        let dir = tempfile::tempdir().unwrap();

        let response = assemble_results(&[], &catalog(dir.path())).await;

        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"results":[]}"#);
    }
}

use crate::{
    config::ModelConfig,
    model_service::{Detection, ModelService, ModelServiceError},
};
use async_trait::async_trait;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{s, Array, ArrayD, Axis, Ix4};
use ort::{
    execution_providers::TensorRTExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

const INPUT_SIZE: u32 = 640;

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.0);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.0);
    width * height
}

fn union(box1: &Detection, box2: &Detection) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

fn iou(box1: &Detection, box2: &Detection) -> f32 {
    let union = union(box1, box2);
    if union <= 0.0 {
        return 0.0;
    }
    intersection(box1, box2) / union
}

fn transform_image(image_data: &[u8]) -> Result<(Array<f32, Ix4>, u32, u32), String> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for pixel in img.pixels() {
        let x = pixel.0 as _;
        let y = pixel.1 as _;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// Decodes a YOLOv8-style `[1, 4 + classes, anchors]` output into boxes scaled
/// back to the original image size.
fn extract_detections(
    outputs: &ArrayD<f32>,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
) -> Result<Vec<Detection>, ModelServiceError> {
    if outputs.ndim() != 3 || outputs.shape()[1] <= 4 {
        return Err(ModelServiceError::Inference(format!(
            "unexpected output shape {:?}",
            outputs.shape()
        )));
    }

    let scale_x = img_width as f32 / INPUT_SIZE as f32;
    let scale_y = img_height as f32 / INPUT_SIZE as f32;

    let outputs = outputs.view().reversed_axes();
    let output = outputs.slice(s![.., .., 0]);

    let mut boxes = Vec::new();
    for row in output.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();
        let Some((class_index, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        boxes.push(Detection {
            class_index,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    Ok(boxes)
}

/// Per-class NMS. The result is ordered by descending confidence.
fn non_max_suppression(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|other| {
            other.class_index != best.class_index || iou(&best, other) < iou_threshold
        });
        result.push(best);
    }

    result
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    iou_threshold: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ort::Error> {
        ort::init()
            .with_execution_providers([TensorRTExecutionProvider::default()
                .with_engine_cache(true)
                .build()])
            .commit()?;
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, ModelServiceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc.lock().map_err(|e| {
            ModelServiceError::Inference(format!("session mutex poisoned: {}", e))
        })?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ModelServiceError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelServiceError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"].try_extract_tensor::<f32>().map_err(|e| {
            ModelServiceError::Inference(format!("failed to extract tensor: {}", e))
        })?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelServiceError::Inference(format!("invalid tensor shape: {}", e)))
    }

    fn detect(
        &self,
        image_data: &[u8],
        min_probability: f32,
    ) -> Result<Vec<Detection>, ModelServiceError> {
        let (input, img_height, img_width) =
            transform_image(image_data).map_err(ModelServiceError::ImageTransformation)?;

        let outputs = self.run_inference(&input)?;
        let boxes = extract_detections(&outputs, img_width, img_height, min_probability)?;

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(
        &self,
        image_path: &Path,
        min_probability: f32,
    ) -> Result<Vec<Detection>, ModelServiceError> {
        let image_data = tokio::fs::read(image_path)
            .await
            .map_err(|source| ModelServiceError::ReadImage {
                path: image_path.display().to_string(),
                source,
            })?;

        let service = self.clone();
        let detections =
            tokio::task::spawn_blocking(move || service.detect(&image_data, min_probability))
                .await??;

        tracing::debug!("Model returned {} detections", detections.len());
        Ok(detections)
    }
}

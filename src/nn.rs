//! YOLOv8 object detection via tract-onnx.

use std::{cmp::Ordering, path::Path};

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::s;
use serde::Serialize;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[Arc<Tensor>; 4]>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Candidate box before class lookup: (confidence, corners, class id).
type Candidate = (f32, [f32; 4], usize);

/// One detected object instance in a frame.
///
/// Corner coordinates are in pixels of the source frame with the origin at
/// the top-left, `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub label: String,
}

/// Synchronous detection model run on single frames.
pub trait InferModel {
    fn run(&self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

pub struct YoloModel {
    model: NnModel,
    input_size: u32,
    min_confidence: f32,
    max_iou: f32,
}

impl YoloModel {
    /// Load a YOLOv8 ONNX graph with a fixed 640x640 input fact.
    pub fn load(path: &Path, min_confidence: f32, max_iou: f32) -> Result<Self> {
        let input_size = 640;
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, input_size as usize, input_size as usize),
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("could not read model from {}", path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("loaded model from {}", path.display());

        Ok(Self {
            model,
            input_size,
            min_confidence,
            max_iou,
        })
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized: RgbImage =
            image::imageops::resize(frame, size, size, image::imageops::FilterType::Triangle);

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as u32, y as u32)][c] as f32 / 255.0,
        )
        .into()
    }

    /// Decode the raw `[1, 4 + classes, anchors]` output into detections in
    /// frame coordinates.
    fn postproc(&self, width: u32, height: u32, raw_nn_out: NnOut) -> Result<Vec<Detection>> {
        let preds = raw_nn_out[0].to_array_view::<f32>()?;
        let preds = preds.slice(s![0, .., ..]);
        let num_classes = preds.shape()[0] - 4;
        let num_anchors = preds.shape()[1];

        // Scale factors from model input space back to the source frame
        let scale_x = width as f32 / self.input_size as f32;
        let scale_y = height as f32 / self.input_size as f32;

        let mut candidates: Vec<Candidate> = Vec::new();
        for anchor in 0..num_anchors {
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, preds[[4 + c, anchor]]))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                .unwrap_or((0, 0.0));
            if score < self.min_confidence {
                continue;
            }

            // Anchor rows are center-x, center-y, width, height
            let (cx, cy, w, h) = (
                preds[[0, anchor]],
                preds[[1, anchor]],
                preds[[2, anchor]],
                preds[[3, anchor]],
            );
            let bbox = [
                ((cx - w / 2.0) * scale_x).clamp(0.0, width as f32),
                ((cy - h / 2.0) * scale_y).clamp(0.0, height as f32),
                ((cx + w / 2.0) * scale_x).clamp(0.0, width as f32),
                ((cy + h / 2.0) * scale_y).clamp(0.0, height as f32),
            ];
            candidates.push((score, bbox, class_id));
        }

        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        let selected = non_maximum_suppression(candidates, self.max_iou);

        Ok(selected
            .into_iter()
            .map(|(score, bbox, class_id)| Detection {
                x1: bbox[0],
                y1: bbox[1],
                x2: bbox[2],
                y2: bbox[3],
                score,
                label: COCO_CLASSES
                    .get(class_id)
                    .copied()
                    .unwrap_or("unknown")
                    .to_string(),
            })
            .collect())
    }
}

impl InferModel for YoloModel {
    fn run(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let (width, height) = frame.dimensions();
        let valid_input = tvec!(self.preproc(frame));
        let raw_nn_out = self.model.run(valid_input)?;
        self.postproc(width, height, raw_nn_out)
    }
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Start with the most confident candidate from the back of the
/// ascending-sorted vector and keep only candidates which do not overlap any
/// already selected box by more than `max_iou`.
fn non_maximum_suppression(mut sorted_candidates: Vec<Candidate>, max_iou: f32) -> Vec<Candidate> {
    let mut selected: Vec<Candidate> = Vec::new();
    'candidates: while let Some((score, bbox, class_id)) = sorted_candidates.pop() {
        for (_, selected_bbox, _) in selected.iter() {
            if iou(&bbox, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }
        selected.push((score, bbox, class_id));
    }

    selected
}

/// Intersection-over-union of two bounding boxes given as
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by a bounding box, zero if the corners are ill-ordered
/// (as happens for the overlap box of two disjoint boxes).
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Class names of the 80 COCO categories, indexed by class id.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let bbox = [10.0, 10.0, 50.0, 50.0];
        assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn area_of_ill_ordered_box_is_zero() {
        assert_eq!(bbox_area(&[10.0, 10.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping_boxes() {
        // Ascending by confidence, as postproc sorts them
        let candidates = vec![
            (0.6, [12.0, 12.0, 52.0, 52.0], 0),
            (0.9, [10.0, 10.0, 50.0, 50.0], 0),
        ];
        let selected = non_maximum_suppression(candidates, 0.45);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, 0.9);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let candidates = vec![
            (0.6, [100.0, 100.0, 140.0, 140.0], 1),
            (0.9, [10.0, 10.0, 50.0, 50.0], 0),
        ];
        let selected = non_maximum_suppression(candidates, 0.45);
        assert_eq!(selected.len(), 2);
    }
}

//! Run object detection on your webcam stream and watch it in the browser.

pub mod annotate;
pub mod endpoints;
pub mod labels;
pub mod nn;
pub mod pipeline;
pub mod sensors;
pub mod utils;

use std::sync::Arc;

use crate::{
    annotate::Annotator, labels::LabelStore, nn::InferModel, pipeline::FramePipeline,
    sensors::CameraConfig,
};

/// Shared state handed to the HTTP handlers.
pub struct AppContext {
    pub pipeline: FramePipeline,
    pub camera: CameraConfig,
    pub labels: Arc<LabelStore>,
}

impl AppContext {
    pub fn new(
        model: Arc<dyn InferModel + Send + Sync>,
        annotator: Annotator,
        camera: CameraConfig,
    ) -> Self {
        let labels = Arc::new(LabelStore::new());
        let pipeline = FramePipeline::new(model, annotator, Arc::clone(&labels));
        Self {
            pipeline,
            camera,
            labels,
        }
    }
}

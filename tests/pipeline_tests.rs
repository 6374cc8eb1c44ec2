//! Pipeline behavior with a scripted detection model.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use image::{Rgb, RgbImage};
use tokio::sync::mpsc;
use yolocam::{
    annotate::Annotator,
    labels::LabelStore,
    nn::{Detection, InferModel},
    pipeline::{self, FramePipeline},
    sensors::CameraConfig,
    AppContext,
};

/// Model stub replaying one prepared result per frame, empty results once
/// the script runs out.
struct ScriptedModel {
    results: Mutex<VecDeque<Result<Vec<Detection>>>>,
}

impl ScriptedModel {
    fn new(results: Vec<Result<Vec<Detection>>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
        }
    }
}

impl InferModel for ScriptedModel {
    fn run(&self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }
}

fn detection(label: &str) -> Detection {
    Detection {
        x1: 8.0,
        y1: 8.0,
        x2: 40.0,
        y2: 40.0,
        score: 0.9,
        label: label.into(),
    }
}

fn detections(labels: &[&str]) -> Result<Vec<Detection>> {
    Ok(labels.iter().map(|label| detection(label)).collect())
}

fn frames(count: usize) -> Vec<RgbImage> {
    (0..count)
        .map(|_| RgbImage::from_pixel(64, 64, Rgb([20, 20, 20])))
        .collect()
}

/// Build a pipeline, or skip the test when the host has no usable font.
fn test_pipeline(
    results: Vec<Result<Vec<Detection>>>,
    labels: &Arc<LabelStore>,
) -> Option<FramePipeline> {
    let annotator = match Annotator::load_default() {
        Ok(annotator) => annotator,
        Err(err) => {
            eprintln!("skipping, no system font available: {err}");
            return None;
        }
    };
    Some(FramePipeline::new(
        Arc::new(ScriptedModel::new(results)),
        annotator,
        Arc::clone(labels),
    ))
}

/// Run the pipeline over the given frames and collect the emitted parts.
fn collect_chunks(pipeline: &FramePipeline, frames: Vec<RgbImage>) -> Vec<Bytes> {
    // Capacity above the frame count, so the sync run never blocks on send
    let (tx, mut rx) = mpsc::channel(16);
    pipeline.run(frames.into_iter(), &tx);
    drop(tx);

    let mut chunks = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        chunks.push(chunk);
    }
    chunks
}

#[test]
fn emits_one_wellformed_chunk_per_frame() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(
        vec![detections(&["person"]), detections(&["person", "dog"])],
        &labels,
    ) else {
        return;
    };

    let chunks = collect_chunks(&pipeline, frames(2));
    assert_eq!(chunks.len(), 2);

    let prefix = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    for chunk in &chunks {
        assert!(chunk.starts_with(prefix));
        assert!(chunk.ends_with(b"\r\n"));

        // Exactly one content-type header per part
        let header = &b"Content-Type: image/jpeg"[..];
        let header_count = chunk.windows(header.len()).filter(|w| *w == header).count();
        assert_eq!(header_count, 1);

        // The payload is a JPEG starting right after the blank line
        let payload = &chunk[prefix.len()..chunk.len() - 2];
        assert!(!payload.is_empty());
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
    }
}

#[test]
fn label_set_reflects_only_the_last_frame() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(
        vec![detections(&["cat"]), detections(&["dog"])],
        &labels,
    ) else {
        return;
    };

    collect_chunks(&pipeline, frames(2));
    assert_eq!(labels.to_vec(), vec!["dog".to_string()]);
}

#[test]
fn duplicate_detections_collapse_to_one_label() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(
        vec![detections(&["person", "person", "person", "dog"])],
        &labels,
    ) else {
        return;
    };

    collect_chunks(&pipeline, frames(1));
    assert_eq!(labels.to_vec(), vec!["dog".to_string(), "person".to_string()]);
    assert_eq!(labels.caption(), "dog, person");
}

#[test]
fn frame_without_detections_clears_labels_but_still_streams() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(
        vec![detections(&["cat"]), detections(&[])],
        &labels,
    ) else {
        return;
    };

    let chunks = collect_chunks(&pipeline, frames(2));
    assert_eq!(chunks.len(), 2);
    assert!(labels.to_vec().is_empty());
}

#[test]
fn inference_failure_stops_the_stream() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(
        vec![
            detections(&["cat"]),
            detections(&["cat"]),
            Err(anyhow!("model rejected the frame")),
        ],
        &labels,
    ) else {
        return;
    };

    // Detector fails on frame 3, so exactly 2 parts make it out
    let chunks = collect_chunks(&pipeline, frames(5));
    assert_eq!(chunks.len(), 2);
}

#[test]
fn ended_source_emits_no_chunks() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(vec![], &labels) else {
        return;
    };

    let chunks = collect_chunks(&pipeline, frames(0));
    assert!(chunks.is_empty());
}

#[test]
fn dropped_receiver_stops_the_run() {
    let labels = Arc::new(LabelStore::new());
    let Some(pipeline) = test_pipeline(vec![], &labels) else {
        return;
    };

    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    // Must return instead of blocking on a consumer that went away
    pipeline.run(frames(3).into_iter(), &tx);
}

#[tokio::test]
async fn camera_open_failure_ends_stream_without_chunks() {
    let annotator = match Annotator::load_default() {
        Ok(annotator) => annotator,
        Err(err) => {
            eprintln!("skipping, no system font available: {err}");
            return;
        }
    };

    let camera = CameraConfig {
        device: "/dev/video-does-not-exist".into(),
        ..Default::default()
    };
    let ctx = Arc::new(AppContext::new(
        Arc::new(ScriptedModel::new(vec![])),
        annotator,
        camera,
    ));

    let mut rx = pipeline::spawn(ctx);
    assert!(rx.recv().await.is_none());
}

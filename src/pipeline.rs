//! Per-frame pipeline: capture, infer, annotate, encode, stream.

use std::{io::Cursor, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use tokio::sync::mpsc;

use crate::{
    annotate::Annotator, labels::LabelStore, nn::InferModel, sensors::CameraSource, AppContext,
};

/// Boundary token of the multipart stream, fixed per the response header
/// `multipart/x-mixed-replace; boundary=frame`.
pub const STREAM_BOUNDARY: &str = "frame";

const JPEG_QUALITY: u8 = 70;

/// Capacity of the channel between the blocking pipeline and the HTTP
/// response. A slow client fills it up and pauses frame production.
const STREAM_CHANNEL_SIZE: usize = 2;

/// Frame one JPEG buffer as a part of the multipart stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::from(
        [
            format!("--{STREAM_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes(),
            data,
            b"\r\n",
        ]
        .concat(),
    )
}

/// Serialize a frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        frame,
        frame.width(),
        frame.height(),
        image::ColorType::Rgb8,
    )?;

    Ok(buf.into_inner())
}

/// Detection pipeline for one video stream.
///
/// Frames are owned by a single loop iteration; the only state crossing the
/// pipeline boundary is the published label set.
pub struct FramePipeline {
    model: Arc<dyn InferModel + Send + Sync>,
    annotator: Annotator,
    labels: Arc<LabelStore>,
}

impl FramePipeline {
    pub fn new(
        model: Arc<dyn InferModel + Send + Sync>,
        annotator: Annotator,
        labels: Arc<LabelStore>,
    ) -> Self {
        Self {
            model,
            annotator,
            labels,
        }
    }

    /// Drive frames through the pipeline until the source ends, a stage
    /// fails, or the consumer goes away. No stage is retried; a clean stop is
    /// preferred over partial output.
    pub fn run(&self, frames: impl Iterator<Item = RgbImage>, tx: &mpsc::Sender<Bytes>) {
        for mut frame in frames {
            let detections = match self.model.run(&frame) {
                Ok(detections) => detections,
                Err(err) => {
                    log::error!("inference failed: {err:#}");
                    break;
                }
            };

            // Full overwrite with this frame's labels, then caption from the
            // just-published set
            self.labels
                .publish(detections.iter().map(|d| d.label.clone()));
            let caption = self.labels.caption();

            self.annotator.annotate(&mut frame, &detections, &caption);

            let jpeg = match encode_jpeg(&frame) {
                Ok(jpeg) => jpeg,
                Err(err) => {
                    log::error!("jpeg encoding failed: {err:#}");
                    break;
                }
            };

            if tx.blocking_send(as_jpeg_stream_item(&jpeg)).is_err() {
                log::info!("client disconnected, stopping stream");
                break;
            }

            log::debug!("streamed frame with {} detections", detections.len());
        }

        log::info!("frame pipeline stopped");
    }
}

/// Start a pipeline run for one `/video_feed` request.
///
/// The camera is opened on a blocking task and released when the run ends;
/// an open failure ends the stream before any part is emitted. Dropping the
/// returned receiver (client disconnect) stops the run on its next send.
pub fn spawn(ctx: Arc<AppContext>) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_SIZE);

    tokio::task::spawn_blocking(move || {
        let source = match CameraSource::open(&ctx.camera) {
            Ok(source) => source,
            Err(err) => {
                log::error!("could not start stream: {err:#}");
                return;
            }
        };

        ctx.pipeline.run(source, &tx);
    });

    rx
}

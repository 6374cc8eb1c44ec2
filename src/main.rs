//! Webcam object detection server.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use axum::{routing::get, Extension, Router};
use clap::Parser;
use env_logger::TimestampPrecision;
use yolocam::{
    annotate::Annotator,
    endpoints::{get_predictions, healthcheck, index, video_feed},
    nn::YoloModel,
    sensors::CameraConfig,
    utils::download_file,
    AppContext,
};

/// Class-agnostic NMS overlap threshold.
const DEFAULT_MAX_IOU: f32 = 0.45;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Video capture device
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Capture resolution as WIDTHxHEIGHT, defaults to the highest the
    /// device offers
    #[clap(long)]
    resolution: Option<String>,

    /// Path to the YOLOv8 ONNX model, defaults to the cached download
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// URL to fetch the model from if it is not cached yet
    #[clap(long)]
    model_url: Option<String>,

    /// Minimum confidence for reported detections
    #[clap(long, default_value_t = 0.25)]
    confidence: f32,

    /// Path to a TTF font for the caption overlay, defaults to a system font
    #[clap(long)]
    font_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let model_path = resolve_model(&args).await?;
    let model = Arc::new(YoloModel::load(&model_path, args.confidence, DEFAULT_MAX_IOU)?);

    let annotator = match &args.font_path {
        Some(path) => Annotator::from_font_path(path)?,
        None => Annotator::load_default()?,
    };

    let camera = CameraConfig {
        device: args.device.clone(),
        resolution: args.resolution.as_deref().map(parse_resolution).transpose()?,
        frame_rate: None,
    };

    let ctx = Arc::new(AppContext::new(model, annotator, camera));

    // Build HTTP server with endpoints
    let app = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/video_feed", get(video_feed))
        .route("/get_predictions", get(get_predictions))
        .layer(Extension(ctx));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

/// Locate the model weights: an explicit path wins, otherwise the cache dir
/// is used and populated via `--model-url` on first run.
async fn resolve_model(args: &Args) -> Result<PathBuf> {
    if let Some(path) = &args.model_path {
        if !path.exists() {
            bail!("model file {} does not exist", path.display());
        }
        return Ok(path.clone());
    }

    let cache_dir = dirs::cache_dir()
        .context("no cache directory available, pass --model-path")?
        .join("yolocam");
    let model_path = cache_dir.join("yolov8n.onnx");

    if !model_path.exists() {
        let url = args.model_url.as_deref().context(
            "no cached model found, pass --model-url to download one or --model-path to use a local file",
        )?;
        std::fs::create_dir_all(&cache_dir)?;
        log::info!("downloading model from {url}");
        download_file(&reqwest::Client::new(), url, &model_path).await?;
    }

    Ok(model_path)
}

fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once('x')
        .context("resolution must be WIDTHxHEIGHT, e.g. 1280x720")?;
    Ok((width.parse()?, height.parse()?))
}

//! Endpoints of the HTTP server.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    Extension, Json,
};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::{pipeline, AppContext};

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<body>
<div class="container">
    <h3>Live Object Detection</h3>
    <img src="/video_feed" width="100%">
    <p>Detected: <span id="predictions"></span></p>
</div>
<script>
setInterval(async () => {
    const resp = await fetch('/get_predictions');
    const labels = await resp.json();
    document.getElementById('predictions').textContent = labels.join(', ');
}, 1000);
</script>
</body>
</html>
"#;

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Landing page hosting the video stream and the label readout.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Annotated video as a multipart JPEG stream. Each request runs its own
/// pipeline against the exclusive capture device; the stream ends when the
/// device is unavailable or a pipeline stage fails.
pub async fn video_feed(Extension(ctx): Extension<Arc<AppContext>>) -> impl IntoResponse {
    log::info!("video feed requested");

    let rx = pipeline::spawn(Arc::clone(&ctx));
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Labels of the most recently processed frame, no duplicates, arbitrary
/// order.
pub async fn get_predictions(Extension(ctx): Extension<Arc<AppContext>>) -> Json<Vec<String>> {
    Json(ctx.labels.to_vec())
}

//! Endpoints of the HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::Query,
    http::header,
    response::{Html, IntoResponse},
    Extension, Json,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    meter::METER,
    panel::{PanelState, SharedPanel},
    pubsub::{annotated_name, ChunkReceiver, NamedPubSub},
};

/// Search parameters available to streams.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    name: Option<String>,
}

impl StreamParams {
    fn name(self) -> String {
        self.name.unwrap_or_else(|| "webcam0".into())
    }
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Browser page: the annotated stream next to the status panel.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Current display panel state.
pub async fn status(Extension(panel): Extension<SharedPanel>) -> Json<PanelState> {
    Json(panel.get())
}

/// Pass-through stream of captured frames.
pub async fn named_stream(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name();
    log::info!("Raw stream for {} requested", &name);

    let rx = pubsub.receiver(&name).await;
    mjpeg_response(rx, || METER.tick_raw())
}

/// Stream of frames with detection overlays.
pub async fn face_stream(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name();
    log::info!("Annotated stream for {} requested", &name);

    let rx = pubsub.receiver(&annotated_name(&name)).await;
    mjpeg_response(rx, || METER.tick_annotated())
}

/// Set body and headers for multipart streaming.
fn mjpeg_response(rx: ChunkReceiver, tick: fn()) -> impl IntoResponse {
    let stream = BroadcastStream::from(rx).map(move |chunk| {
        tick();
        chunk
    });

    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Face Overlay</title>
<style>
  body { margin: 0; min-height: 100vh; display: flex; flex-direction: column;
         align-items: center; background: #111827; color: #f9fafb;
         font-family: sans-serif; }
  .wrap { display: flex; gap: 2rem; align-items: flex-start; padding: 1rem; }
  img { max-width: 60vw; border-radius: 0.75rem; border: 2px solid #374151; }
  #panel { min-width: 16rem; background: #1f2937; border-radius: 0.75rem;
           padding: 1.5rem; font-size: 1.1rem; }
  #panel.error { color: #f87171; }
</style>
</head>
<body>
<h1>Face Overlay</h1>
<div class="wrap">
  <img src="/face_stream" alt="annotated camera stream">
  <div id="panel">Loading face models...</div>
</div>
<script>
  const panel = document.getElementById('panel');

  async function refresh() {
    let state;
    try {
      state = await (await fetch('/status')).json();
    } catch (err) {
      return; // server away; keep the last text
    }
    panel.classList.toggle('error', state.state === 'error');
    switch (state.state) {
      case 'loading':
        panel.textContent = 'Loading face models...';
        break;
      case 'error':
        panel.textContent = state.message;
        break;
      case 'no_face':
        panel.textContent = 'No face detected.';
        break;
      case 'face':
        panel.textContent = 'Age: ' + state.age + ' | Gender: ' + state.gender
          + ' | Expression: ' + state.expression;
        break;
    }
  }

  setInterval(refresh, 250);
</script>
</body>
</html>
"#;

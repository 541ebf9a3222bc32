//! Overlay server binary.
//!
use std::{net::SocketAddr, sync::Arc};

use axum::{routing::get, Extension, Router};
use clap::Parser;
use env_logger::TimestampPrecision;
use overlay_server::{
    analyzer::Analyzer,
    data_socket::spawn_data_socket,
    endpoints::{face_stream, healthcheck, index, named_stream, status},
    meter::spawn_meter_logger,
    nn::{FaceModels, UltrafaceVariant},
    panel::{PanelState, SharedPanel},
    pubsub::NamedPubSub,
    Error, IMAGE_CHANNEL,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP endpoints on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the frame socket capture clients connect to
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Detector input resolution, `320x240` or `640x480`
    #[clap(long, default_value = "320x240")]
    detector_resolution: String,

    /// Minimum confidence for a detection to count as a face
    #[clap(long, default_value_t = 0.5)]
    min_confidence: f32,

    /// Maximum box overlap before the weaker detection is suppressed
    #[clap(long, default_value_t = 0.5)]
    max_iou: f32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let variant: UltrafaceVariant = args.detector_resolution.parse()?;

    // Pub/Sub-Engine fanning frames out to the stream endpoints
    let pubsub = Arc::new(NamedPubSub::new());

    // The panel starts in the loading state until all models are up
    let panel = SharedPanel::new();

    let (infer_tx, infer_rx) = IMAGE_CHANNEL.split();

    // Create socket to receive frames and capture status via network
    spawn_data_socket(
        Arc::clone(&pubsub),
        panel.clone(),
        infer_tx,
        &args.socket_address,
    )
    .await;

    // Load the four model bundles, then hand the frame loop to the
    // analyzer. A load failure is shown on the panel while the HTTP
    // surface stays up.
    let analyzer_panel = panel.clone();
    tokio::spawn(async move {
        match FaceModels::load(variant, args.max_iou, args.min_confidence).await {
            Ok(models) => {
                analyzer_panel.set(PanelState::NoFace);
                Analyzer::new(infer_rx, models, analyzer_panel).run().await;
            }
            Err(err) => {
                log::error!("Model initialization failed: {err:#}");
                analyzer_panel.set(PanelState::error(format!("Failed to load models: {err}")));
            }
        }
    });

    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/stream", get(named_stream))
        .route("/face_stream", get(face_stream))
        .layer(Extension(pubsub))
        .layer(Extension(panel));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

//! Per-frame analysis loop.
//!
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use crate::{
    as_jpeg_stream_item,
    meter::METER,
    nn::FaceModels,
    overlay,
    panel::{DetectionMemory, PanelState, SharedPanel},
    StaticImageReceiver,
};

/// Minimum time between two analysis passes, the detection tick of the
/// original page.
const ANALYZE_PERIOD: Duration = Duration::from_millis(33);

/// Pulls frames off the image channel, runs the face models on them and
/// publishes annotated frames plus the panel state.
pub struct Analyzer {
    rx: StaticImageReceiver,
    models: FaceModels,
    panel: SharedPanel,
    memory: DetectionMemory,
    last_pass: Option<Instant>,
}

impl Analyzer {
    pub fn new(rx: StaticImageReceiver, models: FaceModels, panel: SharedPanel) -> Self {
        Self {
            rx,
            models,
            panel,
            memory: DetectionMemory::new(),
            last_pass: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            let recv_ref = match self.rx.recv_ref().await {
                Some(recv_ref) => recv_ref,
                None => break,
            };
            let (_width, _height, jpeg, annotated_tx) = &*recv_ref;

            // Frames arriving faster than the analysis tick are dropped
            let now = Instant::now();
            if let Some(last_pass) = self.last_pass {
                if now.duration_since(last_pass) < ANALYZE_PERIOD {
                    continue;
                }
            }
            self.last_pass = Some(now);

            let annotated_tx = match annotated_tx {
                Some(tx) => tx.clone(),
                None => continue,
            };

            let decoded: Result<RgbImage, _> = turbojpeg::decompress_image(jpeg);
            // Release the frame slot before the models run on the image
            drop(recv_ref);

            let frame = match decoded {
                Ok(frame) => frame,
                Err(err) => {
                    self.panel
                        .set(PanelState::error(format!("Face detection error: {err}")));
                    continue;
                }
            };

            match self.process(frame, now) {
                Ok(annotated) => {
                    match turbojpeg::compress_image(&annotated, 95, turbojpeg::Subsamp::Sub2x2) {
                        Ok(buf) => {
                            // No subscriber is fine
                            annotated_tx.send(as_jpeg_stream_item(&buf)).ok();
                        }
                        Err(err) => log::warn!("Failed to encode annotated frame: {err}"),
                    }
                }
                Err(err) => {
                    // Caught per frame: show the message, keep polling; the
                    // next good frame replaces it
                    log::warn!("Analysis failed: {err:#}");
                    self.panel
                        .set(PanelState::error(format!("Face detection error: {err}")));
                }
            }
        }
    }

    /// Analyze one frame and draw the overlay for the current detection,
    /// or for the remembered one while the grace window lasts.
    fn process(&mut self, mut frame: RgbImage, now: Instant) -> Result<RgbImage> {
        match self.models.analyze(&frame)? {
            Some(analysis) => {
                METER.tick_face();
                self.panel.set(PanelState::face(&analysis));
                overlay::draw_face(&mut frame, &analysis);
                self.memory.remember(analysis, now);
            }
            None => match self.memory.recall(now) {
                Some(previous) => {
                    self.panel.set(PanelState::face(previous));
                    overlay::draw_face(&mut frame, previous);
                }
                None => self.panel.set(PanelState::NoFace),
            },
        }

        Ok(frame)
    }
}

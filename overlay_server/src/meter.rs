//! Frame-rate counters, logged periodically.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

const LOG_PERIOD: Duration = Duration::from_secs(2);

/// Counters for streamed raw frames, streamed annotated frames and frames
/// in which a face was found.
#[derive(Default)]
pub struct Meter {
    raw_frames: AtomicU64,
    annotated_frames: AtomicU64,
    frames_with_faces: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            raw_frames: AtomicU64::new(0),
            annotated_frames: AtomicU64::new(0),
            frames_with_faces: AtomicU64::new(0),
        }
    }

    pub fn tick_raw(&self) {
        self.raw_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_annotated(&self) {
        self.annotated_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_face(&self) {
        self.frames_with_faces.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_raw(&self) -> u64 {
        self.raw_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_annotated(&self) -> u64 {
        self.annotated_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_faces(&self) -> u64 {
        self.frames_with_faces.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(LOG_PERIOD);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let raw_frames = METER.get_reset_raw();
            let annotated_frames = METER.get_reset_annotated();
            let with_faces = METER.get_reset_faces();
            let elapsed = start.elapsed().as_secs_f32();

            if raw_frames > 0 {
                log::info!("Raw frames per second: {:.2}", raw_frames as f32 / elapsed);
            }
            if annotated_frames > 0 {
                log::info!(
                    "Annotated frames per second: {:.2} ({} with a face)",
                    annotated_frames as f32 / elapsed,
                    with_faces
                );
            }
        }
    })
}

//! Display panel state and the grace window over the last detection.
//!
use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::nn::FaceAnalysis;

/// How long a stale detection keeps being displayed after faces stop
/// being found.
pub const GRACE_WINDOW: Duration = Duration::from_secs(1);

/// What the browser panel should currently display.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PanelState {
    Loading,
    Error { message: String },
    NoFace,
    Face {
        age: String,
        gender: String,
        expression: String,
    },
}

impl PanelState {
    pub fn error(message: impl Into<String>) -> Self {
        PanelState::Error {
            message: message.into(),
        }
    }

    /// Panel entry for a detection: age to exactly one decimal place,
    /// gender label, dominant expression.
    pub fn face(analysis: &FaceAnalysis) -> Self {
        PanelState::Face {
            age: format!("{:.1}", analysis.age),
            gender: analysis.gender.to_string(),
            expression: analysis.expressions.dominant().to_owned(),
        }
    }
}

/// Panel state shared between the analyzer, the data socket and the HTTP
/// handlers.
#[derive(Clone)]
pub struct SharedPanel(Arc<RwLock<PanelState>>);

impl SharedPanel {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(PanelState::Loading)))
    }

    pub fn set(&self, state: PanelState) {
        *self.0.write().unwrap() = state;
    }

    pub fn get(&self) -> PanelState {
        self.0.read().unwrap().clone()
    }
}

impl Default for SharedPanel {
    fn default() -> Self {
        Self::new()
    }
}

/// Most recent positive detection, kept only to bridge brief detection
/// gaps. Overwritten on every new detection, never otherwise cleared.
pub struct DetectionMemory {
    last: Option<(FaceAnalysis, Instant)>,
}

impl DetectionMemory {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn remember(&mut self, analysis: FaceAnalysis, at: Instant) {
        self.last = Some((analysis, at));
    }

    /// The remembered detection, as long as it is younger than the grace
    /// window.
    pub fn recall(&self, now: Instant) -> Option<&FaceAnalysis> {
        match &self.last {
            Some((analysis, at)) if now.duration_since(*at) < GRACE_WINDOW => Some(analysis),
            _ => None,
        }
    }
}

impl Default for DetectionMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nn::{ExpressionScores, FaceAnalysis, Gender};

    fn analysis(age: f32) -> FaceAnalysis {
        FaceAnalysis {
            bbox: [0.25, 0.25, 0.75, 0.75],
            confidence: 0.9,
            landmarks: vec![(0.5, 0.5)],
            age,
            gender: Gender::Female,
            gender_confidence: 0.8,
            expressions: ExpressionScores::new([0.1, 0.7, 0.05, 0.05, 0.025, 0.025, 0.025, 0.025]),
        }
    }

    #[test]
    fn age_is_rendered_to_one_decimal() {
        let state = PanelState::face(&analysis(23.456));
        match state {
            PanelState::Face { age, .. } => assert_eq!(age, "23.5"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn face_state_carries_gender_and_dominant_expression() {
        let state = PanelState::face(&analysis(30.0));
        assert_eq!(
            state,
            PanelState::Face {
                age: "30.0".into(),
                gender: "female".into(),
                expression: "happiness".into(),
            }
        );
    }

    #[test]
    fn memory_recalls_within_the_grace_window() {
        let mut memory = DetectionMemory::new();
        let t0 = Instant::now();
        memory.remember(analysis(25.0), t0);

        let just_under = t0 + Duration::from_millis(999);
        assert!(memory.recall(just_under).is_some());
    }

    #[test]
    fn memory_expires_at_the_grace_window() {
        let mut memory = DetectionMemory::new();
        let t0 = Instant::now();
        memory.remember(analysis(25.0), t0);

        let exactly = t0 + GRACE_WINDOW;
        assert!(memory.recall(exactly).is_none());

        let beyond = t0 + Duration::from_secs(5);
        assert!(memory.recall(beyond).is_none());
    }

    #[test]
    fn memory_is_overwritten_by_newer_detections() {
        let mut memory = DetectionMemory::new();
        let t0 = Instant::now();
        memory.remember(analysis(25.0), t0);

        let t1 = t0 + Duration::from_millis(500);
        memory.remember(analysis(60.0), t1);

        // The older detection no longer exists; only the newest is kept
        let recalled = memory.recall(t1 + Duration::from_millis(900)).unwrap();
        assert_eq!(recalled.age, 60.0);
    }

    #[test]
    fn empty_memory_recalls_nothing() {
        let memory = DetectionMemory::new();
        assert!(memory.recall(Instant::now()).is_none());
    }

    #[test]
    fn panel_states_serialize_with_a_state_tag() {
        let json = serde_json::to_value(PanelState::error("Failed to load models: boom")).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["message"], "Failed to load models: boom");

        let json = serde_json::to_value(PanelState::face(&analysis(23.0))).unwrap();
        assert_eq!(json["state"], "face");
        assert_eq!(json["age"], "23.0");
        assert_eq!(json["gender"], "female");
        assert_eq!(json["expression"], "happiness");

        let json = serde_json::to_value(PanelState::NoFace).unwrap();
        assert_eq!(json["state"], "no_face");
    }
}

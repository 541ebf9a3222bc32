//! Pretrained face model bundles and their pre-/post-processing.
//!
//! Four bundles are loaded at startup: the Ultraface detector, a 68-point
//! landmark regressor, the GoogLeNet age/gender heads and the FER+
//! expression head. All inference is delegated to the bundles through
//! tract; nothing here learns anything.
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use lazy_static::lazy_static;
use ndarray::s;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

use crate::utils::{download_file, model_cache_dir};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[TValue; 4]>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Axis-aligned box in normalized corner coordinates
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
pub type Bbox = [f32; 4];

pub const LANDMARK_POINTS: usize = 68;

/// The fixed expression category set of the FER+ head.
pub const EXPRESSION_LABELS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

/// Midpoints of the age brackets the age head classifies into.
const AGE_BRACKET_MIDPOINTS: [f32; 8] = [1.0, 5.0, 10.5, 17.5, 28.5, 40.5, 50.5, 80.0];

const AGE_GENDER_INPUT: u32 = 224;
/// Caffe-style channel means of the GoogLeNet heads.
const AGE_GENDER_MEAN: [f32; 3] = [123.0, 117.0, 104.0];

const LANDMARK_INPUT: u32 = 112;
const EXPRESSION_INPUT: u32 = 64;

lazy_static! {
    static ref HTTP: reqwest::Client = reqwest::Client::new();
}

/// A named pretrained bundle, fetched from its static URI on first use.
struct ModelSource {
    filename: &'static str,
    url: &'static str,
}

const ULTRAFACE_320: ModelSource = ModelSource {
    filename: "version-RFB-320.onnx",
    url: "https://github.com/onnx/models/raw/main/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
};

const ULTRAFACE_640: ModelSource = ModelSource {
    filename: "version-RFB-640.onnx",
    url: "https://github.com/onnx/models/raw/main/vision/body_analysis/ultraface/models/version-RFB-640.onnx",
};

const LANDMARKS_PFLD: ModelSource = ModelSource {
    filename: "pfld-68.onnx",
    url: "https://github.com/cunjian/pytorch_face_landmark/raw/master/onnx_models/pfld.onnx",
};

const AGE_GOOGLENET: ModelSource = ModelSource {
    filename: "age_googlenet.onnx",
    url: "https://github.com/onnx/models/raw/main/vision/body_analysis/age_gender/models/age_googlenet.onnx",
};

const GENDER_GOOGLENET: ModelSource = ModelSource {
    filename: "gender_googlenet.onnx",
    url: "https://github.com/onnx/models/raw/main/vision/body_analysis/age_gender/models/gender_googlenet.onnx",
};

const EMOTION_FERPLUS: ModelSource = ModelSource {
    filename: "emotion-ferplus-8.onnx",
    url: "https://github.com/onnx/models/raw/main/vision/body_analysis/emotion_ferplus/model/emotion-ferplus-8.onnx",
};

impl ModelSource {
    /// Resolve the bundle in the cache, downloading it on first use.
    async fn fetch(&self) -> Result<PathBuf> {
        let path = model_cache_dir()?.join(self.filename);
        if !path.exists() {
            log::info!("Downloading {} from {}", self.filename, self.url);
            download_file(&HTTP, self.url, &path).await?;
        }
        Ok(path)
    }
}

fn load_model(path: &Path, input_shape: [usize; 4]) -> Result<NnModel> {
    let [n, c, h, w] = input_shape;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(n, c, h, w));
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Which Ultraface input geometry to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UltrafaceVariant {
    W320H240,
    W640H480,
}

impl UltrafaceVariant {
    pub fn width_height(&self) -> (u32, u32) {
        match self {
            UltrafaceVariant::W320H240 => (320, 240),
            UltrafaceVariant::W640H480 => (640, 480),
        }
    }

    fn source(&self) -> &'static ModelSource {
        match self {
            UltrafaceVariant::W320H240 => &ULTRAFACE_320,
            UltrafaceVariant::W640H480 => &ULTRAFACE_640,
        }
    }
}

impl std::str::FromStr for UltrafaceVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "320x240" => Ok(UltrafaceVariant::W320H240),
            "640x480" => Ok(UltrafaceVariant::W640H480),
            other => Err(anyhow!("unknown detector resolution: {other}")),
        }
    }
}

/// Ultraface face detector.
pub struct UltrafaceModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceModel {
    pub async fn new(variant: UltrafaceVariant, max_iou: f32, min_confidence: f32) -> Result<Self> {
        let path = variant.source().fetch().await?;
        let (width, height) = variant.width_height();
        let model = load_model(&path, [1, 3, height as usize, width as usize])?;
        log::info!("Initialized Ultraface model ({width}x{height})");

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    /// Detect faces on a frame.
    ///
    /// Returns normalized boxes with confidences, ordered by descending
    /// confidence; boxes below the confidence floor never appear.
    pub fn detect(&self, frame: &RgbImage) -> Result<Vec<(Bbox, f32)>> {
        let valid_input = tvec!(self.preproc(frame).into());
        let raw_nn_out = self.model.run(valid_input)?;

        self.postproc(raw_nn_out)
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = imageops::resize(
            input,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        );

        // Mean/std are from MobileNet, not from Ultraface, but work well
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| {
                let mean = [0.485, 0.456, 0.406][c];
                let std = [0.229, 0.224, 0.225][c];
                (resized[(x as u32, y as u32)][c] as f32 / 255.0 - mean) / std
            },
        )
        .into()
    }

    fn postproc(&self, raw_nn_out: NnOut) -> Result<Vec<(Bbox, f32)>> {
        let confidences = raw_nn_out[0].to_array_view::<f32>()?;
        let confidences = confidences.slice(s![0, .., 1]);

        let boxes: Vec<f32> = raw_nn_out[1]
            .to_array_view::<f32>()?
            .iter()
            .cloned()
            .collect();

        let mut candidates: Vec<(Bbox, f32)> = confidences
            .iter()
            .zip(boxes.chunks_exact(4))
            .filter(|(confidence, _)| **confidence >= self.min_confidence)
            .map(|(confidence, corners)| {
                (
                    [corners[0], corners[1], corners[2], corners[3]],
                    *confidence,
                )
            })
            .collect();

        // Ascending by confidence; suppression pops from the back
        candidates
            .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(non_maximum_suppression(candidates, self.max_iou))
    }
}

/// 68-point landmark regressor (PFLD).
pub struct LandmarkModel {
    model: NnModel,
}

impl LandmarkModel {
    pub async fn new() -> Result<Self> {
        let path = LANDMARKS_PFLD.fetch().await?;
        let size = LANDMARK_INPUT as usize;
        let model = load_model(&path, [1, 3, size, size])?;
        log::info!("Initialized landmark model");

        Ok(Self { model })
    }

    /// Regress the landmark points on a face crop, normalized to the crop.
    pub fn landmarks(&self, crop: &RgbImage) -> Result<Vec<(f32, f32)>> {
        let size = LANDMARK_INPUT;
        let resized = imageops::resize(crop, size, size, imageops::FilterType::Triangle);

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as u32, y as u32)][c] as f32 / 255.0,
        )
        .into();

        let raw_nn_out = self.model.run(tvec!(tensor.into()))?;
        let coords: Vec<f32> = raw_nn_out[0]
            .to_array_view::<f32>()?
            .iter()
            .cloned()
            .collect();

        let points: Vec<(f32, f32)> = coords.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        if points.len() != LANDMARK_POINTS {
            return Err(anyhow!("unexpected landmark count: {}", points.len()));
        }

        Ok(points)
    }
}

/// Estimated gender label.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Gender {
    Male,
    Female,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

/// GoogLeNet age and gender heads, loaded as one bundle.
pub struct AgeGenderModel {
    age: NnModel,
    gender: NnModel,
}

impl AgeGenderModel {
    pub async fn new() -> Result<Self> {
        let (age_path, gender_path) =
            tokio::try_join!(AGE_GOOGLENET.fetch(), GENDER_GOOGLENET.fetch())?;
        let size = AGE_GENDER_INPUT as usize;
        let age = load_model(&age_path, [1, 3, size, size])?;
        let gender = load_model(&gender_path, [1, 3, size, size])?;
        log::info!("Initialized age/gender model");

        Ok(Self { age, gender })
    }

    /// Estimate age in years (expectation over the bracket distribution)
    /// and gender with its probability.
    pub fn estimate(&self, crop: &RgbImage) -> Result<(f32, Gender, f32)> {
        let tensor = self.preproc(crop);

        let age_out = self.age.run(tvec!(tensor.clone().into()))?;
        let age_probs = normalized(&tensor_values(&age_out[0])?);
        if age_probs.len() != AGE_BRACKET_MIDPOINTS.len() {
            return Err(anyhow!("unexpected age output size: {}", age_probs.len()));
        }
        let age: f32 = age_probs
            .iter()
            .zip(AGE_BRACKET_MIDPOINTS.iter())
            .map(|(p, midpoint)| p * midpoint)
            .sum();

        let gender_out = self.gender.run(tvec!(tensor.into()))?;
        let gender_probs = normalized(&tensor_values(&gender_out[0])?);
        if gender_probs.len() != 2 {
            return Err(anyhow!(
                "unexpected gender output size: {}",
                gender_probs.len()
            ));
        }
        let (gender, confidence) = if gender_probs[0] >= gender_probs[1] {
            (Gender::Male, gender_probs[0])
        } else {
            (Gender::Female, gender_probs[1])
        };

        Ok((age, gender, confidence))
    }

    fn preproc(&self, crop: &RgbImage) -> Tensor {
        let size = AGE_GENDER_INPUT;
        let resized = imageops::resize(crop, size, size, imageops::FilterType::Triangle);

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as u32, y as u32)][c] as f32 - AGE_GENDER_MEAN[c],
        )
        .into()
    }
}

/// Probability distribution over the fixed expression category set.
#[derive(Clone, Debug)]
pub struct ExpressionScores([f32; 8]);

impl ExpressionScores {
    pub fn new(scores: [f32; 8]) -> Self {
        Self(scores)
    }

    pub fn scores(&self) -> &[f32; 8] {
        &self.0
    }

    /// Label of the highest-probability expression. Ties go to the first
    /// category in label order.
    pub fn dominant(&self) -> &'static str {
        let (index, _) = self
            .0
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |(best_index, best_value), (index, &value)| {
                if value > best_value {
                    (index, value)
                } else {
                    (best_index, best_value)
                }
            });

        EXPRESSION_LABELS[index]
    }
}

/// FER+ expression head.
pub struct ExpressionModel {
    model: NnModel,
}

impl ExpressionModel {
    pub async fn new() -> Result<Self> {
        let path = EMOTION_FERPLUS.fetch().await?;
        let size = EXPRESSION_INPUT as usize;
        let model = load_model(&path, [1, 1, size, size])?;
        log::info!("Initialized expression model");

        Ok(Self { model })
    }

    /// Probability distribution over expressions for a face crop.
    pub fn classify(&self, crop: &RgbImage) -> Result<ExpressionScores> {
        let size = EXPRESSION_INPUT;
        let gray = imageops::grayscale(crop);
        let resized = imageops::resize(&gray, size, size, imageops::FilterType::Triangle);

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 1, size as usize, size as usize),
            |(_, _, y, x)| resized[(x as u32, y as u32)][0] as f32,
        )
        .into();

        let raw_nn_out = self.model.run(tvec!(tensor.into()))?;
        let logits: Vec<f32> = raw_nn_out[0]
            .to_array_view::<f32>()?
            .iter()
            .cloned()
            .collect();

        let scores: [f32; 8] = softmax(&logits)
            .try_into()
            .map_err(|_| anyhow!("unexpected expression output size: {}", logits.len()))?;

        Ok(ExpressionScores::new(scores))
    }
}

/// One detected face with everything the secondary heads derived from it.
#[derive(Clone, Debug)]
pub struct FaceAnalysis {
    /// Detection box, normalized to the frame.
    pub bbox: Bbox,
    pub confidence: f32,
    /// Landmark points, normalized to the frame.
    pub landmarks: Vec<(f32, f32)>,
    pub age: f32,
    pub gender: Gender,
    pub gender_confidence: f32,
    pub expressions: ExpressionScores,
}

/// The four bundles, loaded together.
pub struct FaceModels {
    pub detector: UltrafaceModel,
    pub landmarks: LandmarkModel,
    pub age_gender: AgeGenderModel,
    pub expression: ExpressionModel,
}

impl FaceModels {
    pub async fn load(
        variant: UltrafaceVariant,
        max_iou: f32,
        min_confidence: f32,
    ) -> Result<Self> {
        let (detector, landmarks, age_gender, expression) = tokio::try_join!(
            UltrafaceModel::new(variant, max_iou, min_confidence),
            LandmarkModel::new(),
            AgeGenderModel::new(),
            ExpressionModel::new(),
        )?;

        Ok(Self {
            detector,
            landmarks,
            age_gender,
            expression,
        })
    }

    /// Analyze the strongest face in the frame, if any.
    pub fn analyze(&self, frame: &RgbImage) -> Result<Option<FaceAnalysis>> {
        let detections = self.detector.detect(frame)?;

        // Detections come back ordered by descending confidence
        let Some((bbox, confidence)) = detections.into_iter().next() else {
            return Ok(None);
        };

        let (crop, crop_box) = crop_face(frame, &bbox);

        let landmarks = self
            .landmarks
            .landmarks(&crop)?
            .into_iter()
            .map(|point| crop_box.to_frame(point))
            .collect();
        let (age, gender, gender_confidence) = self.age_gender.estimate(&crop)?;
        let expressions = self.expression.classify(&crop)?;

        Ok(Some(FaceAnalysis {
            bbox,
            confidence,
            landmarks,
            age,
            gender,
            gender_confidence,
            expressions,
        }))
    }
}

/// Normalized crop geometry, used to map crop-relative landmarks back onto
/// the frame.
#[derive(Clone, Copy, Debug)]
struct CropBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl CropBox {
    fn to_frame(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.x + x * self.width, self.y + y * self.height)
    }
}

/// Clamped pixel crop of a normalized box, padded a little so chin and
/// forehead stay inside for the secondary heads.
fn crop_face(frame: &RgbImage, bbox: &Bbox) -> (RgbImage, CropBox) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);

    let pad_x = (bbox[2] - bbox[0]) * 0.1;
    let pad_y = (bbox[3] - bbox[1]) * 0.1;
    let x0 = ((bbox[0] - pad_x).max(0.0) * width).floor();
    let y0 = ((bbox[1] - pad_y).max(0.0) * height).floor();
    let x1 = ((bbox[2] + pad_x).min(1.0) * width).ceil();
    let y1 = ((bbox[3] + pad_y).min(1.0) * height).ceil();

    let crop_width = (x1 - x0).max(1.0);
    let crop_height = (y1 - y0).max(1.0);

    let crop = imageops::crop_imm(
        frame,
        x0 as u32,
        y0 as u32,
        crop_width as u32,
        crop_height as u32,
    )
    .to_image();

    let crop_box = CropBox {
        x: x0 / width,
        y: y0 / height,
        width: crop_width / width,
        height: crop_height / height,
    };

    (crop, crop_box)
}

/// Softmax over raw logits.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum::<f32>() + EPS;

    exps.iter().map(|v| v / sum).collect()
}

/// Rescale raw scores into a distribution, guarding against an all-zero
/// output.
fn normalized(values: &[f32]) -> Vec<f32> {
    let sum: f32 = values.iter().sum::<f32>() + EPS;
    values.iter().map(|v| v / sum).collect()
}

fn tensor_values(tensor: &TValue) -> Result<Vec<f32>> {
    Ok(tensor.to_array_view::<f32>()?.iter().cloned().collect())
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Pops the most confident candidate off the back of the ascending-sorted
/// vector and keeps it unless it overlaps an already-kept box by more than
/// `max_iou`. The result is ordered by descending confidence.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<(Bbox, f32)>,
    max_iou: f32,
) -> Vec<(Bbox, f32)> {
    let mut selected: Vec<(Bbox, f32)> = vec![];

    while let Some((bbox, confidence)) = sorted_candidates.pop() {
        let suppressed = selected.iter().any(|(kept, _)| iou(&bbox, kept) > max_iou);
        if !suppressed {
            selected.push((bbox, confidence));
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // If the boxes do not overlap, the corner points of the overlap box are
    // ill-defined and its area is zero.
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    // Avoid division-by-zero with `EPS`
    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by a bounding box, zero when the corners are ill-defined.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn area_of_well_defined_bbox() {
        let bbox: Bbox = [0.1, 0.2, 0.5, 0.6];
        let area = bbox_area(&bbox);
        assert!((area - 0.16).abs() < 1e-6);
    }

    #[test]
    fn area_of_ill_defined_bbox_is_zero() {
        // Bottom-right corner above and left of the top-left corner
        let bbox: Bbox = [0.5, 0.6, 0.1, 0.2];
        assert_eq!(bbox_area(&bbox), 0.0);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let bbox: Bbox = [0.2, 0.2, 0.4, 0.4];
        assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let bbox_a: Bbox = [0.0, 0.0, 0.2, 0.2];
        let bbox_b: Bbox = [0.5, 0.5, 0.9, 0.9];
        assert_eq!(iou(&bbox_a, &bbox_b), 0.0);
    }

    #[test]
    fn nms_keeps_the_most_confident_of_overlapping_boxes() {
        let strong: Bbox = [0.1, 0.1, 0.5, 0.5];
        let weak_overlap: Bbox = [0.12, 0.12, 0.52, 0.52];
        let elsewhere: Bbox = [0.6, 0.6, 0.9, 0.9];

        // Ascending by confidence, as postproc sorts them
        let candidates = vec![(weak_overlap, 0.6), (elsewhere, 0.7), (strong, 0.9)];
        let selected = non_maximum_suppression(candidates, 0.5);

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].0, strong);
        assert_eq!(selected[1].0, elsewhere);
        // Ordered by descending confidence
        assert!(selected[0].1 >= selected[1].1);
    }

    #[test]
    fn softmax_yields_a_distribution() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn dominant_expression_is_the_argmax() {
        let scores = ExpressionScores::new([0.05, 0.6, 0.05, 0.05, 0.05, 0.05, 0.1, 0.05]);
        assert_eq!(scores.dominant(), "happiness");

        let scores = ExpressionScores::new([0.9, 0.02, 0.02, 0.02, 0.01, 0.01, 0.01, 0.01]);
        assert_eq!(scores.dominant(), "neutral");
    }

    #[test]
    fn crop_box_maps_points_back_onto_the_frame() {
        let frame = RgbImage::new(200, 100);
        let bbox: Bbox = [0.25, 0.25, 0.75, 0.75];
        let (crop, crop_box) = crop_face(&frame, &bbox);

        assert!(crop.width() > 0 && crop.height() > 0);

        // The crop center maps near the bbox center
        let (x, y) = crop_box.to_frame((0.5, 0.5));
        assert!((x - 0.5).abs() < 0.05);
        assert!((y - 0.5).abs() < 0.05);
    }

    #[test]
    fn crop_face_clamps_to_the_frame() {
        let frame = RgbImage::new(100, 100);
        // Box hugging the top-left corner; padding must not underflow
        let bbox: Bbox = [0.0, 0.0, 0.3, 0.3];
        let (crop, crop_box) = crop_face(&frame, &bbox);

        assert!(crop.width() <= 100 && crop.height() <= 100);
        let (x, y) = crop_box.to_frame((0.0, 0.0));
        assert!(x >= 0.0 && y >= 0.0);
    }

    #[test]
    fn gender_labels_match_the_display_panel() {
        assert_eq!(Gender::Male.to_string(), "male");
        assert_eq!(Gender::Female.to_string(), "female");
    }
}

//! Draws detection boxes and landmark points onto a frame.
//!
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};

use crate::nn::FaceAnalysis;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const LANDMARK_RADIUS: i32 = 2;

/// Draw the detection box and landmark dots for one analyzed face.
///
/// Coordinates are normalized and scaled to the frame here, which is what
/// lets a remembered detection be redrawn onto a newer frame.
pub fn draw_face(frame: &mut RgbImage, analysis: &FaceAnalysis) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);

    let [x0, y0, x1, y1] = analysis.bbox;
    let (x_tl, y_tl) = (x0 * width, y0 * height);
    let rect_width = ((x1 - x0) * width).max(1.0);
    let rect_height = ((y1 - y0) * height).max(1.0);

    let face_rect =
        Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width as u32, rect_height as u32);
    draw_hollow_rect_mut(frame, face_rect, BOX_COLOR);

    for (x, y) in analysis.landmarks.iter() {
        let center = ((x * width) as i32, (y * height) as i32);
        draw_filled_circle_mut(frame, center, LANDMARK_RADIUS, LANDMARK_COLOR);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nn::{ExpressionScores, Gender};

    #[test]
    fn draws_box_and_landmarks_at_scaled_positions() {
        let mut frame = RgbImage::new(100, 100);
        let analysis = FaceAnalysis {
            bbox: [0.25, 0.25, 0.75, 0.75],
            confidence: 0.9,
            landmarks: vec![(0.5, 0.5)],
            age: 30.0,
            gender: Gender::Male,
            gender_confidence: 0.9,
            expressions: ExpressionScores::new([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        };

        draw_face(&mut frame, &analysis);

        // Top-left corner of the box
        assert_eq!(*frame.get_pixel(25, 25), BOX_COLOR);
        // Landmark dot at the center
        assert_eq!(*frame.get_pixel(50, 50), LANDMARK_COLOR);
        // Untouched area stays black
        assert_eq!(*frame.get_pixel(5, 5), Rgb([0, 0, 0]));
    }
}

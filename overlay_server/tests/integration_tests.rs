use image::{Rgb, RgbImage};
use overlay_server::nn::{FaceModels, UltrafaceVariant};

/// Downloads the model bundles on first run, hence ignored by default.
/// Run with `cargo test -- --ignored` on a machine with network access.
#[tokio::test]
#[ignore]
async fn analyze_finds_no_face_on_a_blank_frame() -> anyhow::Result<()> {
    let models = FaceModels::load(UltrafaceVariant::W320H240, 0.5, 0.5).await?;

    let blank = RgbImage::from_pixel(640, 480, Rgb([16, 16, 16]));
    let analysis = models.analyze(&blank)?;

    assert!(analysis.is_none());

    Ok(())
}

/// Same caveat as above: exercises the full bundle set end to end.
#[tokio::test]
#[ignore]
async fn detector_confidence_floor_is_honored() -> anyhow::Result<()> {
    let models = FaceModels::load(UltrafaceVariant::W320H240, 0.5, 0.9).await?;

    let noise = RgbImage::from_fn(640, 480, |x, y| {
        let v = ((x * 31 + y * 17) % 251) as u8;
        Rgb([v, v.wrapping_add(40), v.wrapping_add(80)])
    });

    for (bbox, confidence) in models.detector.detect(&noise)? {
        assert!(confidence >= 0.9);
        assert!(bbox.iter().all(|c| c.is_finite()));
    }

    Ok(())
}

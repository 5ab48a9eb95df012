//! A replayed camera feed verified against an on-disk catalog.

use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, Luma, Rgb};

use supply_scan::{
    AcquisitionController, CameraState, Catalog, CatalogVerifier, Decoder, DisplayClock, Frame,
    ImageSequenceCamera, Outcome, QrDecoder, SessionSnapshot, VerificationState,
};

/// Treats a frame whose top-left pixel is white as carrying `code`.
fn marker_decoder(code: &'static str) -> Arc<dyn Decoder> {
    Arc::new(move |frame: &Frame| -> Option<String> {
        let px = frame.image.get_pixel(0, 0);
        (px.0[0] == 255).then(|| code.to_string())
    })
}

fn write_feed(dir: &std::path::Path, marked_index: usize, frames: usize) {
    for i in 0..frames {
        let mut img = DynamicImage::new_rgb8(32, 24).to_rgb8();
        if i == marked_index {
            img.put_pixel(0, 0, Rgb([255, 255, 255]));
        }
        img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
}

fn write_catalog(dir: &std::path::Path) -> Catalog {
    let path = dir.join("catalog.json");
    std::fs::write(
        &path,
        r#"{"products": [{"code": "ABC123", "product": "Hybrid maize seed", "manufacturer": "GreenLife Seeds Ltd."}]}"#,
    )
    .unwrap();
    Catalog::load(&path).unwrap()
}

async fn run_feed(code: &'static str) -> SessionSnapshot {
    let frames = tempfile::tempdir().unwrap();
    write_feed(frames.path(), 3, 5);
    let catalog = write_catalog(frames.path());

    let decoder = marker_decoder(code);
    let verifier = CatalogVerifier::new(catalog, decoder.clone());
    let (handle, task) = AcquisitionController::new(
        Arc::new(ImageSequenceCamera::new(frames.path())),
        decoder,
        Arc::new(verifier),
    )
    .with_clock(Box::new(DisplayClock::from_fps(240)))
    .spawn();

    handle.activate().await.unwrap();
    let done = tokio::time::timeout(
        Duration::from_secs(10),
        handle.wait_for(|s| s.verification.is_terminal()),
    )
    .await
    .unwrap()
    .unwrap();

    handle.unmount().await.unwrap();
    let summary = task.await.unwrap();
    assert_eq!(summary.devices_acquired, 1);
    assert_eq!(summary.devices_released, 1);
    done
}

#[tokio::test]
async fn test_replayed_feed_authentic_code() {
    let done = run_feed("ABC123").await;
    assert_eq!(done.verification, VerificationState::Success);
    assert_eq!(done.camera, CameraState::Idle);
    assert_eq!(done.frames_scanned, 4);
    let report = done.report.unwrap();
    assert_eq!(report.manufacturer.as_deref(), Some("GreenLife Seeds Ltd."));
    assert_eq!(report.product.as_deref(), Some("Hybrid maize seed"));
}

#[tokio::test]
async fn test_replayed_feed_unknown_code() {
    let done = run_feed("FAKE-999").await;
    assert_eq!(done.verification, VerificationState::Failed);
    assert_eq!(done.report.unwrap().outcome, Outcome::Failed);
    assert_eq!(done.last_error.as_deref(), Some("unknown product code"));
}

#[tokio::test]
async fn test_missing_feed_is_a_camera_error() {
    let decoder = marker_decoder("ABC123");
    let verifier = CatalogVerifier::new(Catalog::default(), decoder.clone());
    let (handle, _task) = AcquisitionController::new(
        Arc::new(ImageSequenceCamera::new("/nonexistent/feed")),
        decoder,
        Arc::new(verifier),
    )
    .spawn();

    handle.activate().await.unwrap();
    let failed = tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.camera == CameraState::Error),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(failed.last_error.unwrap().contains("/nonexistent/feed"));
}

fn qr_image(payload: &str, module_px: u32) -> GrayImage {
    let code = qrcode::QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 8) * module_px;
    GrayImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / module_px, y / module_px);
        let inside = (4..4 + modules).contains(&mx) && (4..4 + modules).contains(&my);
        let dark = inside && colors[((my - 4) * modules + (mx - 4)) as usize] == qrcode::Color::Dark;
        Luma([if dark { 0 } else { 255 }])
    })
}

#[tokio::test]
async fn test_qr_label_in_feed_is_verified() {
    let frames = tempfile::tempdir().unwrap();
    let blank = GrayImage::from_pixel(232, 232, Luma([255]));
    blank.save(frames.path().join("frame_000.png")).unwrap();
    blank.save(frames.path().join("frame_001.png")).unwrap();
    qr_image("ABC123", 8)
        .save(frames.path().join("frame_002.png"))
        .unwrap();
    let catalog = write_catalog(frames.path());

    let decoder: Arc<dyn Decoder> = Arc::new(QrDecoder::new());
    let verifier = CatalogVerifier::new(catalog, decoder.clone());
    let (handle, _task) = AcquisitionController::new(
        Arc::new(ImageSequenceCamera::new(frames.path())),
        decoder,
        Arc::new(verifier),
    )
    .with_clock(Box::new(DisplayClock::from_fps(240)))
    .spawn();

    handle.activate().await.unwrap();
    let done = tokio::time::timeout(
        Duration::from_secs(10),
        handle.wait_for(|s| s.verification.is_terminal()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(done.verification, VerificationState::Success);
    assert_eq!(done.decoded_payload.as_deref(), Some("ABC123"));
    assert_eq!(done.frames_scanned, 3);
    assert_eq!(
        done.report.unwrap().product.as_deref(),
        Some("Hybrid maize seed")
    );
}

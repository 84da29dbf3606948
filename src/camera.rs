//! Image capture pipeline
//!
//! Camera frames are throttled to a minimum interval, scaled so the longer
//! side fits the configured bound, re-encoded as JPEG, and sent as media
//! chunks. The expensive work runs on blocking tasks behind an active-flag
//! guard so frames racing a stop are cheap to discard.

use crate::device::CameraSourceFn;
use crate::events::{EventKind, HostEvent, MessageCallback};
use crate::protocol::{self, IMAGE_MIME};
use crate::session::SessionHandle;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageEncoder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Minimum-interval gate for accepting camera frames.
///
/// The acceptance time only advances when a frame is accepted, so a burst of
/// discarded frames does not push the next acceptance further out.
pub struct FrameThrottle {
    min_interval: Duration,
    last_accept: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accept: None,
        }
    }

    /// Whether a frame arriving now should be processed.
    pub fn accept(&mut self) -> bool {
        self.accept_at(Instant::now())
    }

    pub fn accept_at(&mut self, now: Instant) -> bool {
        match self.last_accept {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_accept = Some(now);
                true
            }
        }
    }
}

/// Dimensions scaled so the longer side is exactly `max_dimension`, aspect
/// ratio preserved. Images already within bound are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    if width > height {
        let ratio = width as f32 / max_dimension as f32;
        (max_dimension, (height as f32 / ratio) as u32)
    } else {
        let ratio = height as f32 / max_dimension as f32;
        ((width as f32 / ratio) as u32, max_dimension)
    }
}

/// Decode, scale, JPEG-encode, and send one frame.
pub(crate) fn process_and_send(
    session: &SessionHandle,
    bytes: &[u8],
    max_dimension: u32,
    jpeg_quality: u8,
) {
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("dropping undecodable camera frame: {e}");
            return;
        }
    };

    let (width, height) = (img.width(), img.height());
    let (new_width, new_height) = fit_within(width, height, max_dimension);
    let img = if (new_width, new_height) == (width, height) {
        img
    } else {
        debug!("scaling frame {width}x{height} -> {new_width}x{new_height}");
        img.resize_exact(new_width, new_height, FilterType::Triangle)
    };

    let rgb = img.to_rgb8();
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality);
    if let Err(e) = encoder.write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    ) {
        error!("jpeg encode failed: {e}");
        return;
    }

    let b64 = STANDARD.encode(&jpeg);
    session.send(protocol::encode_media_chunk(&b64, IMAGE_MIME));
}

/// Reads a host-supplied camera source and streams throttled frames.
pub struct CameraPipeline {
    session: SessionHandle,
    runtime: Handle,
    callback: MessageCallback,
    active: Arc<AtomicBool>,
    max_dimension: u32,
    jpeg_quality: u8,
    min_interval: Duration,
}

impl CameraPipeline {
    pub fn new(
        session: SessionHandle,
        runtime: Handle,
        callback: MessageCallback,
        max_dimension: u32,
        jpeg_quality: u8,
        min_interval: Duration,
    ) -> Self {
        Self {
            session,
            runtime,
            callback,
            active: Arc::new(AtomicBool::new(false)),
            max_dimension,
            jpeg_quality,
            min_interval,
        }
    }

    /// Open the camera source and start the frame loop.
    ///
    /// No-op when already active. A source that cannot be opened is reported
    /// through the host callback and the pipeline does not start.
    pub fn start(&self, factory: &CameraSourceFn) {
        if self.active.swap(true, Ordering::SeqCst) {
            debug!("camera already active");
            return;
        }

        let mut source = match factory() {
            Ok(source) => source,
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                error!("camera unavailable: {e}");
                (self.callback)(HostEvent::new(
                    format!("camera unavailable: {e}"),
                    EventKind::Error,
                ));
                return;
            }
        };

        let active = Arc::clone(&self.active);
        let session = self.session.clone();
        let runtime = self.runtime.clone();
        let callback = self.callback.clone();
        let max_dimension = self.max_dimension;
        let jpeg_quality = self.jpeg_quality;
        let min_interval = self.min_interval;
        let spawned = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || {
                info!("camera capture started");
                let mut throttle = FrameThrottle::new(min_interval);
                while active.load(Ordering::SeqCst) {
                    match source.next_frame() {
                        Ok(frame) => {
                            if !throttle.accept() {
                                debug!("camera frame discarded by throttle");
                                continue;
                            }
                            let session = session.clone();
                            let active = Arc::clone(&active);
                            runtime.spawn_blocking(move || {
                                // the camera may have stopped while this
                                // frame waited for a worker
                                if !active.load(Ordering::SeqCst) {
                                    return;
                                }
                                process_and_send(
                                    &session,
                                    &frame.bytes,
                                    max_dimension,
                                    jpeg_quality,
                                );
                            });
                        }
                        Err(e) => {
                            error!("camera frame error: {e}");
                            (callback)(HostEvent::new(
                                format!("camera error: {e}"),
                                EventKind::Error,
                            ));
                            break;
                        }
                    }
                }
                active.store(false, Ordering::SeqCst);
                info!("camera capture stopped");
                // source dropped here, releasing the camera
            });
        if let Err(e) = spawned {
            self.active.store(false, Ordering::SeqCst);
            error!("failed to spawn camera thread: {e}");
            (self.callback)(HostEvent::new(
                format!("camera unavailable: {e}"),
                EventKind::Error,
            ));
        }
    }

    /// Flag the frame loop to stop at its next iteration boundary.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("stopping camera capture");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Host-triggered single image send; not subject to the throttle.
    pub fn send_direct(&self, bytes: Vec<u8>) {
        let session = self.session.clone();
        let max_dimension = self.max_dimension;
        let jpeg_quality = self.jpeg_quality;
        self.runtime.spawn_blocking(move || {
            process_and_send(&session, &bytes, max_dimension, jpeg_quality);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CameraSource, ImageFrame};
    use crate::session::test_handle;
    use image::RgbImage;

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        });
        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, 90);
        encoder
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        jpeg
    }

    #[test]
    fn throttle_first_frame_always_accepted() {
        let mut throttle = FrameThrottle::new(Duration::from_millis(3000));
        assert!(throttle.accept_at(Instant::now()));
    }

    #[test]
    fn throttle_acceptance_counts_match_spacing() {
        let start = Instant::now();
        let mut throttle = FrameThrottle::new(Duration::from_millis(3000));
        let offsets_ms = [0u64, 1000, 2999, 3000, 4000, 5999, 9000];
        let expected = [true, false, false, true, false, false, true];

        for (offset, want) in offsets_ms.iter().zip(expected) {
            let accepted = throttle.accept_at(start + Duration::from_millis(*offset));
            assert_eq!(accepted, want, "offset {offset}ms");
        }
    }

    #[test]
    fn throttle_discards_do_not_advance_window() {
        let start = Instant::now();
        let mut throttle = FrameThrottle::new(Duration::from_millis(3000));
        assert!(throttle.accept_at(start));
        // a burst of rejected frames right before the boundary
        for offset in [2990u64, 2995, 2999] {
            assert!(!throttle.accept_at(start + Duration::from_millis(offset)));
        }
        assert!(throttle.accept_at(start + Duration::from_millis(3000)));
    }

    #[test]
    fn fit_within_bounds_longest_side() {
        assert_eq!(fit_within(2048, 1024, 1024), (1024, 512));
        assert_eq!(fit_within(1000, 4000, 1024), (256, 1024));
        assert_eq!(fit_within(5000, 5000, 1024), (1024, 1024));
        assert_eq!(fit_within(1025, 10, 1024), (1024, 9));
    }

    #[test]
    fn fit_within_leaves_small_images_alone() {
        assert_eq!(fit_within(800, 600, 1024), (800, 600));
        assert_eq!(fit_within(1024, 1024, 1024), (1024, 1024));
        assert_eq!(fit_within(1, 1, 1024), (1, 1));
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        let (w, h) = fit_within(1920, 1080, 1024);
        assert_eq!(w, 1024);
        let expected = 1080.0 * (1024.0 / 1920.0);
        assert!((h as f32 - expected).abs() <= 1.0);
    }

    #[test]
    fn process_and_send_scales_and_frames_jpeg() {
        let (handle, mut rx) = test_handle();
        let jpeg = test_jpeg(2000, 500);

        process_and_send(&handle, &jpeg, 1024, 70);

        let frame = rx.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let chunk = &parsed["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], "image/jpeg");

        let sent = STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
        let decoded = image::load_from_memory(&sent).unwrap();
        assert_eq!(decoded.width(), 1024);
        assert_eq!(decoded.height(), 256);
    }

    #[test]
    fn process_and_send_keeps_small_images_unscaled() {
        let (handle, mut rx) = test_handle();
        let jpeg = test_jpeg(320, 240);

        process_and_send(&handle, &jpeg, 1024, 70);

        let frame = rx.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let sent = STANDARD
            .decode(parsed["realtime_input"]["media_chunks"][0]["data"].as_str().unwrap())
            .unwrap();
        let decoded = image::load_from_memory(&sent).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn process_and_send_drops_garbage_input() {
        let (handle, mut rx) = test_handle();
        process_and_send(&handle, b"not an image", 1024, 70);
        assert!(rx.try_recv().is_err());
    }

    /// Yields scripted frames back to back, then fails.
    struct ScriptedCamera {
        frames: Vec<Vec<u8>>,
    }

    impl CameraSource for ScriptedCamera {
        fn next_frame(&mut self) -> anyhow::Result<ImageFrame> {
            if self.frames.is_empty() {
                anyhow::bail!("camera stream ended");
            }
            let bytes = self.frames.remove(0);
            Ok(ImageFrame::new(bytes, 0, 0))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn burst_of_frames_yields_single_send() {
        let (handle, mut rx) = test_handle();
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: MessageCallback = Arc::new(move |event| {
            let _ = event_tx.send(event);
        });
        let pipeline = CameraPipeline::new(
            handle,
            Handle::current(),
            callback,
            1024,
            70,
            Duration::from_millis(3000),
        );

        let jpeg = test_jpeg(64, 64);
        let frames = vec![jpeg.clone(), jpeg.clone(), jpeg];
        let frames = std::sync::Mutex::new(Some(frames));
        let factory: CameraSourceFn = Box::new(move || {
            let frames = frames.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedCamera { frames }) as Box<dyn CameraSource>)
        });

        pipeline.start(&factory);

        // exactly one of the three back-to-back frames passes the throttle
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no frame sent")
            .unwrap();
        assert!(frame.contains("image/jpeg"));
        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err());

        // the scripted source then errors out, stopping the pipeline
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .expect("no camera error reported")
            .unwrap();
        assert_eq!(event.kind, EventKind::Error);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pipeline.is_active() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!pipeline.is_active());
    }
}

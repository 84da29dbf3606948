//! Embedding-facing lifecycle facade
//!
//! [`LiveEngine`] owns the async runtime, the session controller, and all
//! three pipelines, and maps the host's synchronous lifecycle calls onto
//! them. The host creates and destroys the engine explicitly; every failure
//! is reported through the message callback rather than returned.

use crate::audio_capture::AudioCapturePipeline;
use crate::camera::CameraPipeline;
use crate::config::LiveConfig;
use crate::device::{AudioInputFn, AudioOutputFn, CameraSourceFn};
use crate::error::Result;
use crate::events::{EventKind, HostEvent, MessageCallback};
use crate::playback::PlaybackQueue;
use crate::session::SessionController;
use std::sync::Arc;
use tracing::{error, info};

/// One live session: connection, audio in/out, and camera, driven by host
/// lifecycle calls.
pub struct LiveEngine {
    runtime: tokio::runtime::Runtime,
    session: SessionController,
    audio: AudioCapturePipeline,
    camera: CameraPipeline,
    playback: Arc<PlaybackQueue>,
    callback: MessageCallback,
    input_factory: AudioInputFn,
    camera_factory: Option<CameraSourceFn>,
    cleaned: bool,
}

impl LiveEngine {
    /// Build an engine with host-supplied device factories.
    ///
    /// The input factory runs on every `start_recording`, the output factory
    /// on first playback, the camera factory on every `start_camera`.
    pub fn with_devices(
        config: LiveConfig,
        callback: MessageCallback,
        audio_input: AudioInputFn,
        audio_output: AudioOutputFn,
        camera_source: Option<CameraSourceFn>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("lumilive-worker")
            .build()?;

        let playback = PlaybackQueue::new(audio_output, callback.clone());
        let session = SessionController::new(config.clone(), callback.clone(), Arc::clone(&playback));
        let audio = AudioCapturePipeline::new(
            session.handle(),
            runtime.handle().clone(),
            callback.clone(),
            config.capture_frame_samples,
        );
        let camera = CameraPipeline::new(
            session.handle(),
            runtime.handle().clone(),
            callback.clone(),
            config.max_image_dimension,
            config.jpeg_quality,
            config.image_send_interval,
        );

        Ok(Self {
            runtime,
            session,
            audio,
            camera,
            playback,
            callback,
            input_factory: audio_input,
            camera_factory: camera_source,
            cleaned: false,
        })
    }

    /// Build an engine on the default PulseAudio devices.
    #[cfg(feature = "pulse")]
    pub fn new(config: LiveConfig, callback: MessageCallback) -> Result<Self> {
        use crate::device::{AudioInput, AudioOutput, PulseInput, PulseOutput};

        let rate = config.sample_rate;
        let input: AudioInputFn = Box::new(move || {
            Ok(Box::new(PulseInput::new("lumilive", rate)?) as Box<dyn AudioInput>)
        });
        let output: AudioOutputFn = Box::new(move || {
            Ok(Box::new(PulseOutput::new("lumilive", rate)?) as Box<dyn AudioOutput>)
        });
        Self::with_devices(config, callback, input, output, None)
    }

    /// Attach the camera source the host selected.
    pub fn set_camera_source(&mut self, factory: CameraSourceFn) {
        self.camera_factory = Some(factory);
    }

    /// Open the connection and perform the setup handshake.
    pub fn start(&mut self) {
        if let Err(e) = self.runtime.block_on(self.session.connect()) {
            error!("session start failed: {e}");
        }
    }

    /// Close the connection. Queued pipeline data is dropped, not replayed.
    pub fn stop(&mut self) {
        self.runtime.block_on(self.session.disconnect());
    }

    pub fn start_recording(&self) {
        self.audio.start(&self.input_factory);
    }

    pub fn stop_recording(&self) {
        self.audio.stop();
    }

    pub fn start_camera(&self) {
        match &self.camera_factory {
            Some(factory) => self.camera.start(factory),
            None => {
                error!("no camera source configured");
                (self.callback)(HostEvent::new("no camera source available", EventKind::Error));
            }
        }
    }

    pub fn stop_camera(&self) {
        self.camera.stop();
    }

    /// Process and send one host-captured image, bypassing the throttle.
    pub fn send_image(&self, bytes: Vec<u8>) {
        self.camera.send_direct(bytes);
    }

    /// Applies to the next setup handshake.
    pub fn set_muted(&self, muted: bool) {
        self.session.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.session.is_muted()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn is_recording(&self) -> bool {
        self.audio.is_recording()
    }

    pub fn is_camera_active(&self) -> bool {
        self.camera.is_active()
    }

    /// Tear everything down: stop capture, close the session silently,
    /// cancel tasks, drop queued data, and release the devices.
    pub fn clean_up(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        info!("cleaning up live engine");

        self.audio.stop();
        self.session.suppress_events();
        self.runtime.block_on(self.session.disconnect());
        self.session.shutdown();
        self.audio.clear();
        self.playback.close();
        self.camera.stop();
    }
}

impl Drop for LiveEngine {
    fn drop(&mut self) {
        self.clean_up();
    }
}

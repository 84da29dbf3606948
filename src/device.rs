//! Device trait seams for audio and camera hardware
//!
//! The engine only ever talks to these traits; the embedding host may plug
//! in its own implementations (it owns permission checks and hardware
//! selection). PulseAudio-backed defaults are provided behind the `pulse`
//! feature for desktop hosts.

use anyhow::Result;
use std::time::Instant;

/// Blocking PCM capture device: 16-bit signed mono samples.
pub trait AudioInput: Send {
    /// Read one device-granularity frame of samples into `buf`, blocking
    /// until data is available. Returns the number of samples written.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Blocking PCM playback device: 16-bit signed little-endian mono bytes.
pub trait AudioOutput: Send {
    /// Write one chunk, blocking until the device has buffered it.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// One camera frame as delivered by the host's camera stack.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Encoded image bytes (typically JPEG straight off the sensor).
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

impl ImageFrame {
    pub fn new(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
            captured_at: Instant::now(),
        }
    }
}

/// Blocking camera frame source. The host selects the hardware camera and
/// hands the engine an implementation of this trait.
pub trait CameraSource: Send {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<ImageFrame>;
}

/// Factory invoked each time recording starts; the device is released when
/// recording stops.
pub type AudioInputFn = Box<dyn Fn() -> Result<Box<dyn AudioInput>> + Send + Sync>;
/// Factory invoked lazily when playback first needs the output device.
pub type AudioOutputFn = Box<dyn Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync>;
/// Factory invoked each time the camera pipeline starts.
pub type CameraSourceFn = Box<dyn Fn() -> Result<Box<dyn CameraSource>> + Send + Sync>;

#[cfg(feature = "pulse")]
pub use pulse_devices::{PulseInput, PulseOutput};

#[cfg(feature = "pulse")]
mod pulse_devices {
    use super::{AudioInput, AudioOutput};
    use anyhow::{Context, Result};
    use libpulse_binding::sample::{Format, Spec};
    use libpulse_binding::stream::Direction;
    use libpulse_simple_binding::Simple;

    fn spec(sample_rate: u32) -> Spec {
        Spec {
            format: Format::S16le,
            channels: 1,
            rate: sample_rate,
        }
    }

    /// Microphone capture through a blocking PulseAudio record stream.
    pub struct PulseInput {
        simple: Simple,
    }

    impl PulseInput {
        pub fn new(app_name: &str, sample_rate: u32) -> Result<Self> {
            let simple = Simple::new(
                None,
                app_name,
                Direction::Record,
                None,
                "capture",
                &spec(sample_rate),
                None,
                None,
            )
            .context("failed to open PulseAudio record stream")?;
            Ok(Self { simple })
        }
    }

    impl AudioInput for PulseInput {
        fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
            let mut raw = vec![0u8; buf.len() * 2];
            self.simple
                .read(&mut raw)
                .context("PulseAudio read failed")?;
            for (sample, bytes) in buf.iter_mut().zip(raw.chunks_exact(2)) {
                *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
            }
            Ok(buf.len())
        }
    }

    /// Speaker playback through a blocking PulseAudio playback stream.
    pub struct PulseOutput {
        simple: Simple,
    }

    impl PulseOutput {
        pub fn new(app_name: &str, sample_rate: u32) -> Result<Self> {
            let simple = Simple::new(
                None,
                app_name,
                Direction::Playback,
                None,
                "playback",
                &spec(sample_rate),
                None,
                None,
            )
            .context("failed to open PulseAudio playback stream")?;
            Ok(Self { simple })
        }
    }

    impl AudioOutput for PulseOutput {
        fn write(&mut self, pcm: &[u8]) -> Result<()> {
            self.simple
                .write(pcm)
                .context("PulseAudio write failed")?;
            Ok(())
        }
    }
}

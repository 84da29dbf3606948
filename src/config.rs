//! Configuration for the live session engine

use std::time::Duration;

const HOST: &str = "generativelanguage.googleapis.com";
const SERVICE_PATH: &str =
    "google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Capture and playback sample rate in Hz.
pub const SAMPLE_RATE: u32 = 24_000;
/// Longest image side sent to the service, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 1024;
/// JPEG re-encode quality for outgoing frames.
pub const JPEG_QUALITY: u8 = 70;
/// Minimum spacing between accepted camera frames.
pub const IMAGE_SEND_INTERVAL: Duration = Duration::from_millis(3000);

/// Configuration for a live session.
///
/// [`LiveConfig::from_api_key`] fills in the production endpoint; the fields
/// are public so tests and self-hosted endpoints can point elsewhere.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Full WebSocket URL, including the API key query parameter.
    pub url: String,
    /// Model identifier sent in the setup handshake.
    pub model: String,
    /// Initial mute state: muted sessions request text-only responses.
    pub muted: bool,
    /// PCM sample rate for capture and playback.
    pub sample_rate: u32,
    /// Samples per blocking device read; also the audio chunk granularity.
    pub capture_frame_samples: usize,
    /// Longest allowed image side before scaling.
    pub max_image_dimension: u32,
    /// JPEG quality for outgoing frames.
    pub jpeg_quality: u8,
    /// Minimum interval between accepted camera frames.
    pub image_send_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: DEFAULT_MODEL.to_string(),
            muted: false,
            sample_rate: SAMPLE_RATE,
            // 100 ms of audio per device read
            capture_frame_samples: (SAMPLE_RATE / 10) as usize,
            max_image_dimension: MAX_IMAGE_DIMENSION,
            jpeg_quality: JPEG_QUALITY,
            image_send_interval: IMAGE_SEND_INTERVAL,
        }
    }
}

impl LiveConfig {
    /// Build a config pointing at the production endpoint.
    pub fn from_api_key(api_key: &str) -> Self {
        Self {
            url: format!("wss://{}/ws/{}?key={}", HOST, SERVICE_PATH, api_key),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_api_key_builds_endpoint_url() {
        let config = LiveConfig::from_api_key("secret");
        assert!(config.url.starts_with("wss://generativelanguage.googleapis.com/ws/"));
        assert!(config.url.ends_with("?key=secret"));
        assert_eq!(config.sample_rate, 24_000);
        assert!(!config.muted);
    }
}

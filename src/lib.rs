//! Lumilive - realtime bidirectional multimodal streaming client
//!
//! Captures microphone audio and periodic camera images, streams them to a
//! generative-AI service over a persistent WebSocket, and plays back audio
//! and text responses as they arrive. Embedding hosts (e.g. a game engine)
//! drive the lifecycle through [`LiveEngine`] and receive events through a
//! [`MessageCallback`].

#![forbid(unsafe_code)]

/// Outbound audio pipeline: device capture, chunking, encode-and-send
pub mod audio_capture;
/// Image capture pipeline: throttle, scale, JPEG encode, send
pub mod camera;
/// Engine configuration and wire constants
pub mod config;
/// Device trait seams and the PulseAudio-backed implementations
pub mod device;
/// Embedding-facing lifecycle facade
pub mod engine;
/// Error taxonomy
pub mod error;
/// Host callback event types
pub mod events;
/// Shared bounded concurrent FIFO primitive
pub mod fifo;
/// Inbound audio playback queue
pub mod playback;
/// Wire protocol codec
pub mod protocol;
/// Session controller: connection state machine and message routing
pub mod session;

pub use config::LiveConfig;
pub use device::{AudioInput, AudioOutput, CameraSource, ImageFrame};
pub use engine::LiveEngine;
pub use error::{LiveError, Result};
pub use events::{EventKind, HostEvent, MessageCallback};
pub use playback::PlaybackQueue;
pub use session::{ConnectionState, SessionController, SessionHandle};

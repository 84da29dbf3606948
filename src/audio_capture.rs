//! Outbound audio pipeline
//!
//! A dedicated thread blocks on the input device while recording is active.
//! Samples are appended to a mutex-guarded accumulator and atomically
//! drained after each append; every drained batch becomes one chunk,
//! little-endian packed, base64-encoded, framed, and sent. Chunk boundaries
//! follow device read granularity, not a timer.

use crate::device::{AudioInput, AudioInputFn};
use crate::events::{EventKind, HostEvent, MessageCallback};
use crate::fifo::ChunkFifo;
use crate::protocol::{self, AUDIO_MIME};
use crate::session::SessionHandle;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

const ACCUMULATOR_CAPACITY: usize = 256;

/// Captures microphone audio and streams it to the session.
pub struct AudioCapturePipeline {
    session: SessionHandle,
    runtime: Handle,
    callback: MessageCallback,
    recording: Arc<AtomicBool>,
    accumulator: Arc<ChunkFifo<Vec<i16>>>,
    frame_samples: usize,
}

impl AudioCapturePipeline {
    pub fn new(
        session: SessionHandle,
        runtime: Handle,
        callback: MessageCallback,
        frame_samples: usize,
    ) -> Self {
        Self {
            session,
            runtime,
            callback,
            recording: Arc::new(AtomicBool::new(false)),
            accumulator: Arc::new(ChunkFifo::new(ACCUMULATOR_CAPACITY)),
            frame_samples,
        }
    }

    /// Acquire the input device and start the capture loop.
    ///
    /// No-op when already recording. Device failures are reported through
    /// the host callback; the pipeline simply does not start.
    pub fn start(&self, factory: &AudioInputFn) {
        if self.recording.swap(true, Ordering::SeqCst) {
            debug!("audio capture already running");
            return;
        }

        let device = match factory() {
            Ok(device) => device,
            Err(e) => {
                self.recording.store(false, Ordering::SeqCst);
                error!("audio input unavailable: {e}");
                (self.callback)(HostEvent::new(
                    format!("audio input unavailable: {e}"),
                    EventKind::Error,
                ));
                return;
            }
        };

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        self.runtime
            .spawn(encode_loop(chunk_rx, self.session.clone()));

        let recording = Arc::clone(&self.recording);
        let accumulator = Arc::clone(&self.accumulator);
        let frame_samples = self.frame_samples;
        let spawned = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                info!("audio capture started ({frame_samples} samples per read)");
                let mut device = device;
                capture_loop(
                    device.as_mut(),
                    &recording,
                    &accumulator,
                    frame_samples,
                    &chunk_tx,
                );
                recording.store(false, Ordering::SeqCst);
                info!("audio capture stopped");
                // device dropped here, releasing it
            });
        if let Err(e) = spawned {
            self.recording.store(false, Ordering::SeqCst);
            error!("failed to spawn audio capture thread: {e}");
            (self.callback)(HostEvent::new(
                format!("audio capture unavailable: {e}"),
                EventKind::Error,
            ));
        }
    }

    /// Flag the capture loop to stop at its next iteration boundary.
    pub fn stop(&self) {
        if self.recording.swap(false, Ordering::SeqCst) {
            info!("stopping audio capture");
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Drop any samples not yet submitted.
    pub fn clear(&self) {
        self.accumulator.clear();
    }
}

fn capture_loop(
    device: &mut dyn AudioInput,
    recording: &AtomicBool,
    accumulator: &ChunkFifo<Vec<i16>>,
    frame_samples: usize,
    chunk_tx: &UnboundedSender<Vec<i16>>,
) {
    while recording.load(Ordering::SeqCst) {
        let mut buf = vec![0i16; frame_samples];
        match device.read(&mut buf) {
            Ok(0) => continue,
            Ok(read) => {
                buf.truncate(read);
                accumulator.push(buf);
                let drained = accumulator.drain_all();
                if drained.is_empty() {
                    continue;
                }
                let mut samples = Vec::with_capacity(drained.iter().map(Vec::len).sum());
                for piece in drained {
                    samples.extend_from_slice(&piece);
                }
                if chunk_tx.send(samples).is_err() {
                    debug!("encoder task gone, stopping capture");
                    break;
                }
            }
            Err(e) => {
                error!("audio read failed: {e}");
                break;
            }
        }
    }
}

/// Packs, encodes, and frames chunks in submission order.
async fn encode_loop(mut rx: UnboundedReceiver<Vec<i16>>, session: SessionHandle) {
    while let Some(samples) = rx.recv().await {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for sample in &samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        let b64 = STANDARD.encode(&pcm);
        session.send(protocol::encode_media_chunk(&b64, AUDIO_MIME));
    }
}

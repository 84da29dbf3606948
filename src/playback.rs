//! Inbound audio playback queue
//!
//! Decoded PCM chunks from the session are queued in arrival order and
//! drained through the audio output device by at most one drain thread at a
//! time. The drain re-checks the queue under the drain flag before exiting
//! so a chunk racing with its conclusion is never stranded.

use crate::device::{AudioOutput, AudioOutputFn};
use crate::events::{EventKind, HostEvent, MessageCallback};
use crate::fifo::ChunkFifo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

const QUEUE_CAPACITY: usize = 256;

/// FIFO of decoded PCM buffers with a single active drain.
pub struct PlaybackQueue {
    queue: ChunkFifo<Vec<u8>>,
    /// True while a drain thread is logically active.
    draining: Mutex<bool>,
    /// Output device, opened lazily on first playback.
    output: Mutex<Option<Box<dyn AudioOutput>>>,
    output_factory: AudioOutputFn,
    /// Terminal flag: once closed, chunks are discarded and the device is
    /// never reopened.
    closed: AtomicBool,
    callback: MessageCallback,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlaybackQueue {
    pub fn new(output_factory: AudioOutputFn, callback: MessageCallback) -> Arc<Self> {
        Arc::new(Self {
            queue: ChunkFifo::new(QUEUE_CAPACITY),
            draining: Mutex::new(false),
            output: Mutex::new(None),
            output_factory,
            closed: AtomicBool::new(false),
            callback,
        })
    }

    /// Append one chunk and make sure a drain is running.
    pub fn enqueue(self: &Arc<Self>, chunk: Vec<u8>) {
        if self.closed.load(Ordering::Relaxed) {
            debug!("playback closed, dropping {} byte chunk", chunk.len());
            return;
        }
        self.queue.push(chunk);

        let mut draining = lock(&self.draining);
        if !*draining {
            let queue = Arc::clone(self);
            let spawned = std::thread::Builder::new()
                .name("playback-drain".into())
                .spawn(move || queue.drain());
            match spawned {
                Ok(_) => *draining = true,
                Err(e) => error!("failed to spawn playback drain: {e}"),
            }
        }
    }

    /// Pop and play until the queue stays empty.
    fn drain(&self) {
        loop {
            match self.queue.pop() {
                Some(chunk) => {
                    if let Err(e) = self.write_chunk(&chunk) {
                        error!("audio playback failed: {e}");
                        (self.callback)(HostEvent::new(
                            format!("audio playback failed: {e}"),
                            EventKind::Error,
                        ));
                        self.queue.clear();
                    }
                }
                None => {
                    let mut draining = lock(&self.draining);
                    if self.queue.is_empty() {
                        *draining = false;
                        return;
                    }
                    // a chunk arrived while this drain was concluding
                }
            }
        }
    }

    fn write_chunk(&self, chunk: &[u8]) -> anyhow::Result<()> {
        let mut output = lock(&self.output);
        if self.closed.load(Ordering::Relaxed) {
            debug!("playback closed, discarding {} byte chunk", chunk.len());
            return Ok(());
        }
        if output.is_none() {
            *output = Some((self.output_factory)()?);
        }
        if let Some(device) = output.as_mut() {
            device.write(chunk)?;
        }
        Ok(())
    }

    /// Number of chunks waiting to play.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Drop all pending chunks; an in-flight device write completes.
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Clear the queue and release the output device. Terminal.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.queue.clear();
        *lock(&self.output) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::Receiver;
    use std::time::{Duration, Instant};

    struct RecordingOutput {
        chunks: Arc<Mutex<Vec<Vec<u8>>>>,
        active_writes: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
        gate: Option<Receiver<()>>,
    }

    impl AudioOutput for RecordingOutput {
        fn write(&mut self, pcm: &[u8]) -> anyhow::Result<()> {
            let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            self.chunks.lock().unwrap().push(pcm.to_vec());
            self.active_writes.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for RecordingOutput {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    struct Probes {
        chunks: Arc<Mutex<Vec<Vec<u8>>>>,
        max_active: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    fn gated_playback(gate: Option<Receiver<()>>) -> (Arc<PlaybackQueue>, Probes) {
        let probes = Probes {
            chunks: Arc::new(Mutex::new(Vec::new())),
            max_active: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicBool::new(false)),
        };
        let chunks = Arc::clone(&probes.chunks);
        let max_active = Arc::clone(&probes.max_active);
        let dropped = Arc::clone(&probes.dropped);
        let gate = Mutex::new(gate);
        let factory: AudioOutputFn = Box::new(move || {
            Ok(Box::new(RecordingOutput {
                chunks: Arc::clone(&chunks),
                active_writes: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::clone(&max_active),
                dropped: Arc::clone(&dropped),
                gate: lock(&gate).take(),
            }) as Box<dyn AudioOutput>)
        });
        let callback: MessageCallback = Arc::new(|_| {});
        (PlaybackQueue::new(factory, callback), probes)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn plays_chunks_in_enqueue_order() {
        let (playback, probes) = gated_playback(None);
        for i in 0u8..32 {
            playback.enqueue(vec![i; 4]);
        }
        wait_for(|| probes.chunks.lock().unwrap().len() == 32);

        let chunks = probes.chunks.lock().unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk, &vec![i as u8; 4]);
        }
        assert_eq!(probes.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_drain_starts_after_previous_concluded() {
        let (playback, probes) = gated_playback(None);
        playback.enqueue(vec![1]);
        wait_for(|| probes.chunks.lock().unwrap().len() == 1);
        wait_for(|| !*lock(&playback.draining));

        playback.enqueue(vec![2]);
        wait_for(|| probes.chunks.lock().unwrap().len() == 2);
        assert_eq!(probes.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_enqueues_all_play_exactly_once() {
        let (playback, probes) = gated_playback(None);
        let mut handles = Vec::new();
        for t in 0u8..4 {
            let playback = Arc::clone(&playback);
            handles.push(std::thread::spawn(move || {
                for i in 0u8..25 {
                    playback.enqueue(vec![t, i]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        wait_for(|| probes.chunks.lock().unwrap().len() == 100);

        let mut chunks = probes.chunks.lock().unwrap().clone();
        chunks.sort();
        chunks.dedup();
        assert_eq!(chunks.len(), 100);
        assert_eq!(probes.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_clears_queue_and_releases_device() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let (playback, probes) = gated_playback(Some(gate_rx));

        playback.enqueue(vec![1]);
        playback.enqueue(vec![2]);
        playback.enqueue(vec![3]);

        // first chunk is in flight, two remain queued
        wait_for(|| probes.max_active.load(Ordering::SeqCst) == 1);
        playback.clear();
        assert_eq!(playback.queued(), 0);

        // let the in-flight write finish, then tear down
        drop(gate_tx);
        wait_for(|| !*lock(&playback.draining));
        playback.close();
        wait_for(|| probes.dropped.load(Ordering::SeqCst));
        assert_eq!(playback.queued(), 0);

        // closed queue discards new chunks
        playback.enqueue(vec![4]);
        assert_eq!(playback.queued(), 0);
    }

    #[test]
    fn factory_failure_reports_error_and_drops_queue() {
        let failures = Arc::new(AtomicUsize::new(0));
        let factory: AudioOutputFn = Box::new(|| anyhow::bail!("no device"));
        let failures_clone = Arc::clone(&failures);
        let callback: MessageCallback = Arc::new(move |event| {
            assert_eq!(event.kind, EventKind::Error);
            failures_clone.fetch_add(1, Ordering::SeqCst);
        });
        let playback = PlaybackQueue::new(factory, callback);

        playback.enqueue(vec![1]);
        playback.enqueue(vec![2]);
        wait_for(|| !*lock(&playback.draining));
        assert_eq!(playback.queued(), 0);
        assert!(failures.load(Ordering::SeqCst) >= 1);
    }
}

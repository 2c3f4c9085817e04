use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use voxturn_core::{AudioChunk, AudioError};

// ── ChunkAssembler ────────────────────────────────────────────

/// Accumulates interleaved samples into fixed-length [`AudioChunk`]s with
/// monotonically increasing ids.
pub struct ChunkAssembler {
    buffer: Vec<f32>,
    chunk_len: usize,
    sample_rate: u32,
    channels: u16,
    next_id: u64,
}

impl ChunkAssembler {
    pub fn new(sample_rate: u32, channels: u16, chunk_ms: u32) -> Self {
        let frames = (sample_rate as u64 * chunk_ms as u64 / 1000).max(1) as usize;
        let chunk_len = frames * channels.max(1) as usize;
        Self {
            buffer: Vec::with_capacity(chunk_len),
            chunk_len,
            sample_rate,
            channels,
            next_id: 1,
        }
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Append samples, returning every chunk completed by them.
    pub fn push(&mut self, mut data: &[f32]) -> Vec<AudioChunk> {
        let mut ready = Vec::new();
        while !data.is_empty() {
            let take = (self.chunk_len - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.chunk_len {
                ready.push(self.emit());
            }
        }
        ready
    }

    /// Emit whatever is buffered as a final, possibly short, chunk.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    fn emit(&mut self) -> AudioChunk {
        let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_len));
        let id = self.next_id;
        self.next_id += 1;
        AudioChunk {
            id,
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

// ── CaptureHandle ─────────────────────────────────────────────

#[derive(Clone)]
pub struct CaptureHandle {
    enabled: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Pausing capture drops incoming samples; the partial chunk is kept.
    pub fn set_enabled(&self, v: bool) {
        self.enabled.store(v, Ordering::Relaxed);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

// ── CaptureNode ───────────────────────────────────────────────

pub struct CaptureNode {
    _stream: Stream,
}

impl CaptureNode {
    pub fn new(
        device: &Device,
        sample_rate: u32,
        channels: u16,
        buffer_size: u32,
        chunk_ms: u32,
        chunk_tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<(Self, CaptureHandle), AudioError> {
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(buffer_size),
        };

        let assembler = Arc::new(Mutex::new(ChunkAssembler::new(
            sample_rate,
            channels,
            chunk_ms,
        )));
        let enabled = Arc::new(AtomicBool::new(true));
        let enabled_flag = Arc::clone(&enabled);
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = Arc::clone(&failed);

        let err_callback = move |err: cpal::StreamError| {
            tracing::error!("capture stream error: {}", err);
            failed_flag.store(true, Ordering::Relaxed);
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !enabled_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    let ready = match assembler.lock() {
                        Ok(mut asm) => asm.push(data),
                        Err(_) => return,
                    };
                    for chunk in ready {
                        // Receiver gone means the pipeline is shutting down
                        let _ = chunk_tx.send(chunk);
                    }
                },
                err_callback,
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

        let handle = CaptureHandle { enabled, failed };
        Ok((Self { _stream: stream }, handle))
    }
}

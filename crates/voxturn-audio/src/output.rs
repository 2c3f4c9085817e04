use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use voxturn_core::{AudioError, SynthesizedAudio};

// ── PlaybackQueue ─────────────────────────────────────────────

/// Producer side of the playback ring buffer. Converts synthesized PCM to
/// normalized floats.
pub struct PlaybackQueue {
    producer: HeapProd<f32>,
}

impl PlaybackQueue {
    pub fn new(producer: HeapProd<f32>) -> Self {
        Self { producer }
    }

    /// Queue `audio` for playback. Returns the number of samples accepted;
    /// anything beyond the free space is dropped.
    pub fn enqueue(&mut self, audio: &SynthesizedAudio) -> usize {
        let samples: Vec<f32> = audio.samples.iter().map(|s| *s as f32 / 32768.0).collect();
        let pushed = self.producer.push_slice(&samples);
        if pushed < samples.len() {
            tracing::warn!(
                dropped = samples.len() - pushed,
                "playback buffer full, dropping samples"
            );
        }
        pushed
    }
}

// ── PlaybackHandle ────────────────────────────────────────────

#[derive(Clone)]
pub struct PlaybackHandle {
    playing: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl PlaybackHandle {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_playing(&self, v: bool) {
        self.playing.store(v, Ordering::Relaxed);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

// ── PlaybackNode ──────────────────────────────────────────────

pub struct PlaybackNode {
    _stream: Stream,
}

impl PlaybackNode {
    pub fn new(
        device: &Device,
        consumer: HeapCons<f32>,
        sample_rate: u32,
        buffer_size: u32,
    ) -> Result<(Self, PlaybackHandle), AudioError> {
        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(buffer_size),
        };

        let consumer = Arc::new(Mutex::new(consumer));
        let playing = Arc::new(AtomicBool::new(true));
        let playing_flag = Arc::clone(&playing);
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = Arc::clone(&failed);

        let err_callback = move |err: cpal::StreamError| {
            tracing::error!("playback stream error: {}", err);
            failed_flag.store(true, Ordering::Relaxed);
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !playing_flag.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    if let Ok(mut cons) = consumer.lock() {
                        for sample in data.iter_mut() {
                            *sample = cons.try_pop().unwrap_or(0.0);
                        }
                    } else {
                        data.fill(0.0);
                    }
                },
                err_callback,
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

        let handle = PlaybackHandle { playing, failed };
        Ok((Self { _stream: stream }, handle))
    }
}

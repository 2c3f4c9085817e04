use ringbuf::traits::Consumer;
use voxturn_audio::{ChunkAssembler, FrameCodecDecoder, PlaybackQueue, SyntheticCodec, VoiceActivityGate};
use voxturn_core::{GateReason, SynthesizedAudio};

fn tone(sample_rate: u32, ms: u32) -> Vec<f32> {
    let n = (sample_rate * ms / 1000) as usize;
    (0..n)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 180.0 * i as f32 / sample_rate as f32).sin())
        .collect()
}

#[test]
fn test_captured_chunks_pass_through_gate() {
    let mut asm = ChunkAssembler::new(16000, 1, 500);
    let gate = VoiceActivityGate::default();

    let mut signal = vec![0.0f32; 8000];
    signal.extend(tone(16000, 500));

    let chunks = asm.push(&signal);
    assert_eq!(chunks.len(), 2);

    let silent = gate.evaluate(&chunks[0]);
    let voiced = gate.evaluate(&chunks[1]);
    assert_eq!(silent.reason, GateReason::BelowSilenceFloor);
    assert!(voiced.has_speech);
    assert!(chunks[0].id < chunks[1].id);
}

#[test]
fn test_decoded_audio_reaches_playback_buffer() {
    let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
    let codes: Vec<i64> = (0..28).map(|i| (i * 301) % 4097).collect();
    let pcm = decoder.decode(&codes).unwrap();

    let (prod, mut cons) = voxturn_audio::create_ring_buffer(4096);
    let mut queue = PlaybackQueue::new(prod);
    let pushed = queue.enqueue(&SynthesizedAudio {
        samples: pcm.clone(),
        sample_rate: 24000,
    });
    assert_eq!(pushed, pcm.len());

    let mut out = vec![0.0f32; pcm.len()];
    assert_eq!(cons.pop_slice(&mut out), pcm.len());
    for (f, s) in out.iter().zip(pcm.iter()) {
        assert!((f - *s as f32 / 32768.0).abs() < 1e-6);
    }
}

//! Fixed-geometry frame codec.
//!
//! A synthesis engine emits a flat stream of discrete codes. Every 7 codes
//! form one frame spread over three tiers (1, 2 and 4 codes per frame). The
//! tiers go to a [`CodecBackend`], and a fixed slice of the waveform it
//! returns becomes 16-bit PCM.

use voxturn_core::{CodecError, CODES_PER_FRAME, MAX_CODE};

/// Start of the usable slice within the backend waveform.
pub const SLICE_OFFSET: usize = 2048;
/// Length of the usable slice, independent of the number of frames.
pub const SLICE_LEN: usize = 2048;

/// Codes redistributed into the three codec tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTiers {
    pub tier0: Vec<i64>,
    pub tier1: Vec<i64>,
    pub tier2: Vec<i64>,
}

impl CodeTiers {
    pub fn frames(&self) -> usize {
        self.tier0.len()
    }
}

/// The codec-decode primitive: turns tiers into a raw floating waveform of
/// at least `SLICE_OFFSET + SLICE_LEN` samples.
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &str;
    fn decode(&self, tiers: &CodeTiers) -> Result<Vec<f32>, CodecError>;
}

impl<T: CodecBackend + ?Sized> CodecBackend for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn decode(&self, tiers: &CodeTiers) -> Result<Vec<f32>, CodecError> {
        (**self).decode(tiers)
    }
}

impl<T: CodecBackend + ?Sized> CodecBackend for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn decode(&self, tiers: &CodeTiers) -> Result<Vec<f32>, CodecError> {
        (**self).decode(tiers)
    }
}

pub struct FrameCodecDecoder<B> {
    backend: B,
}

impl<B: CodecBackend> FrameCodecDecoder<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Decode a flat code stream into PCM samples.
    ///
    /// Fails without producing any audio when fewer than one frame of codes
    /// is supplied or when any code falls outside `[0, 4096]`.
    pub fn decode(&self, codes: &[i64]) -> Result<Vec<i16>, CodecError> {
        let tiers = split_tiers(codes)?;
        let waveform = self.backend.decode(&tiers)?;

        let required = SLICE_OFFSET + SLICE_LEN;
        if waveform.len() < required {
            return Err(CodecError::ShortWaveform {
                len: waveform.len(),
                required,
            });
        }

        Ok(waveform[SLICE_OFFSET..required]
            .iter()
            .map(|s| (s * 32767.0) as i16)
            .collect())
    }
}

/// Validate `codes`, right-pad to a whole number of frames and distribute
/// them over the three tiers.
pub fn split_tiers(codes: &[i64]) -> Result<CodeTiers, CodecError> {
    if codes.len() < CODES_PER_FRAME {
        return Err(CodecError::InsufficientCodes { count: codes.len() });
    }
    if let Some((index, &code)) = codes
        .iter()
        .enumerate()
        .find(|(_, c)| !(0..=MAX_CODE).contains(*c))
    {
        return Err(CodecError::InvalidCodeRange { index, code });
    }

    let frames = codes.len().div_ceil(CODES_PER_FRAME);
    let mut padded = codes.to_vec();
    padded.resize(frames * CODES_PER_FRAME, 0);

    let mut tiers = CodeTiers {
        tier0: Vec::with_capacity(frames),
        tier1: Vec::with_capacity(frames * 2),
        tier2: Vec::with_capacity(frames * 4),
    };
    for frame in padded.chunks_exact(CODES_PER_FRAME) {
        tiers.tier0.push(frame[0]);
        tiers.tier1.extend_from_slice(&[frame[1], frame[4]]);
        tiers.tier2.extend_from_slice(&[frame[2], frame[3], frame[5], frame[6]]);
    }
    Ok(tiers)
}

/// Deterministic stand-in for a neural codec. Each frame contributes a
/// 2048-sample tone whose pitch and level derive from its codes, and the
/// waveform always starts with one frame of lead-in.
pub struct SyntheticCodec {
    samples_per_frame: usize,
}

impl SyntheticCodec {
    pub fn new() -> Self {
        Self {
            samples_per_frame: SLICE_LEN,
        }
    }
}

impl Default for SyntheticCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBackend for SyntheticCodec {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn decode(&self, tiers: &CodeTiers) -> Result<Vec<f32>, CodecError> {
        let frames = tiers.frames();
        if tiers.tier1.len() != frames * 2 || tiers.tier2.len() != frames * 4 {
            return Err(CodecError::Backend(format!(
                "tier shape mismatch: {} / {} / {}",
                frames,
                tiers.tier1.len(),
                tiers.tier2.len()
            )));
        }

        let spf = self.samples_per_frame;
        let mut waveform = vec![0.0f32; spf * (frames + 1)];
        for j in 0..frames {
            let freq = 80.0 + (tiers.tier0[j] as f32 / MAX_CODE as f32) * 400.0;
            let level = 0.1 + 0.4 * (tiers.tier1[2 * j] as f32 / MAX_CODE as f32);
            let ripple = tiers.tier2[4 * j..4 * j + 4].iter().sum::<i64>() as f32
                / (4.0 * MAX_CODE as f32);
            let out = &mut waveform[(j + 1) * spf..(j + 2) * spf];
            for (i, sample) in out.iter_mut().enumerate() {
                let t = i as f32 / 24000.0;
                *sample = level * (2.0 * std::f32::consts::PI * freq * t).sin() + 0.05 * ripple;
            }
        }
        Ok(waveform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Backend that records the tiers it receives and returns a ramp.
    struct RecordingCodec {
        seen: Mutex<Vec<CodeTiers>>,
        len: usize,
    }

    impl RecordingCodec {
        fn new(len: usize) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                len,
            }
        }
    }

    impl CodecBackend for RecordingCodec {
        fn name(&self) -> &str {
            "recording"
        }

        fn decode(&self, tiers: &CodeTiers) -> Result<Vec<f32>, CodecError> {
            self.seen.lock().unwrap().push(tiers.clone());
            Ok((0..self.len).map(|i| i as f32 / self.len as f32).collect())
        }
    }

    #[test]
    fn test_decode_single_frame_returns_fixed_slice() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        let pcm = decoder.decode(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(pcm.len(), 2048);
    }

    #[test]
    fn test_decode_rejects_out_of_range_code() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        let err = decoder.decode(&[5000, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidCodeRange {
                index: 0,
                code: 5000
            }
        );
    }

    #[test]
    fn test_decode_rejects_negative_code() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        let err = decoder.decode(&[0, 0, 0, 0, 0, 0, 0, -1]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidCodeRange { index: 7, code: -1 }));
    }

    #[test]
    fn test_decode_accepts_boundary_codes() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        assert!(decoder.decode(&[0, 4096, 0, 4096, 0, 4096, 0]).is_ok());
    }

    #[test]
    fn test_decode_rejects_fewer_than_one_frame() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        assert_eq!(
            decoder.decode(&[]).unwrap_err(),
            CodecError::InsufficientCodes { count: 0 }
        );
        assert_eq!(
            decoder.decode(&[1, 2, 3, 4, 5, 6]).unwrap_err(),
            CodecError::InsufficientCodes { count: 6 }
        );
    }

    #[test]
    fn test_invalid_codes_never_reach_backend() {
        let decoder = FrameCodecDecoder::new(RecordingCodec::new(4096));
        let mut codes = vec![1i64; 20];
        codes[13] = 4097;
        assert!(decoder.decode(&codes).is_err());
        assert!(decoder.backend().seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        let codes: Vec<i64> = (0..35).map(|i| (i * 117) % 4097).collect();
        let a = decoder.decode(&codes).unwrap();
        let b = decoder.decode(&codes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_pads_partial_frames_and_keeps_slice_length() {
        let decoder = FrameCodecDecoder::new(SyntheticCodec::new());
        for len in [8usize, 10, 13, 15, 22, 48] {
            let codes: Vec<i64> = (0..len as i64).collect();
            let pcm = decoder.decode(&codes).unwrap();
            assert_eq!(pcm.len(), SLICE_LEN, "length {len}");
        }
    }

    #[test]
    fn test_split_tiers_frame_layout() {
        let codes: Vec<i64> = (10..24).collect();
        let tiers = split_tiers(&codes).unwrap();
        assert_eq!(tiers.tier0, vec![10, 17]);
        assert_eq!(tiers.tier1, vec![11, 14, 18, 21]);
        assert_eq!(tiers.tier2, vec![12, 13, 15, 16, 19, 20, 22, 23]);
    }

    #[test]
    fn test_split_tiers_zero_pads_last_frame() {
        let codes: Vec<i64> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9];
        let tiers = split_tiers(&codes).unwrap();
        assert_eq!(tiers.frames(), 2);
        assert_eq!(tiers.tier0, vec![1, 8]);
        assert_eq!(tiers.tier1, vec![2, 5, 9, 0]);
        assert_eq!(tiers.tier2, vec![3, 4, 6, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_scales_and_truncates() {
        let decoder = FrameCodecDecoder::new(RecordingCodec::new(4096));
        let pcm = decoder.decode(&[0; 7]).unwrap();
        // Ramp value at index 2048 + k is (2048 + k) / 4096.
        assert_eq!(pcm[0], 16383);
        assert_eq!(pcm[2047], ((4095.0f32 / 4096.0) * 32767.0) as i16);
    }

    #[test]
    fn test_decode_rejects_short_waveform() {
        let decoder = FrameCodecDecoder::new(RecordingCodec::new(3000));
        let err = decoder.decode(&[0; 7]).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShortWaveform {
                len: 3000,
                required: 4096
            }
        );
    }

    #[test]
    fn test_synthetic_codec_rejects_malformed_tiers() {
        let tiers = CodeTiers {
            tier0: vec![1],
            tier1: vec![1],
            tier2: vec![1, 2, 3, 4],
        };
        assert!(SyntheticCodec::new().decode(&tiers).is_err());
    }
}

pub mod capture;
pub mod codec;
pub mod device;
pub mod gate;
pub mod output;

pub use capture::{CaptureHandle, CaptureNode, ChunkAssembler};
pub use codec::{CodeTiers, CodecBackend, FrameCodecDecoder, SyntheticCodec};
pub use device::DeviceManager;
pub use gate::VoiceActivityGate;
pub use output::{PlaybackHandle, PlaybackNode, PlaybackQueue};

use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a ring buffer split into producer and consumer halves.
pub fn create_ring_buffer(capacity: usize) -> (HeapProd<f32>, HeapCons<f32>) {
    HeapRb::<f32>::new(capacity).split()
}

//! Chunked capture of the combined (video + mixed audio) stream

mod chunk;
mod codec;

pub use chunk::{CaptureConfig, Chunk, ChunkedCapture, RecordingChunks};
pub use codec::{
    negotiate, CodecSupport, EncodingFormat, FragmentEncoder, PcmFragmentEncoder, WavCodecs,
    AUDIO_CANDIDATES, VIDEO_CANDIDATES,
};

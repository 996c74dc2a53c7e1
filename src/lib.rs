pub mod audio;
pub mod bridge;
pub mod capture;
pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod sim;
pub mod storage;
pub mod transport;

pub use audio::{AudioFrame, AudioGraph, AudioInjector, AudioSpec, ClipFetcher, MixerConfig};
pub use bridge::RemoteAudioBridge;
pub use capture::{ChunkedCapture, CodecSupport, EncodingFormat, RecordingChunks, WavCodecs};
pub use config::Config;
pub use error::{
    DecodeError, EncodingUnsupportedError, InvalidStateTransition, MediaAccessError,
    NetworkTimeoutError, TransportError,
};
pub use media::{
    AspectRatio, MediaAcquirer, MediaDevices, MediaStreamHandle, MediaTrack, RecordingPreference,
};
pub use session::{
    SessionConfig, SessionOrchestrator, SessionPorts, SessionRecord, SessionState, StartOutcome,
    StopReport,
};
pub use storage::{BlobStorage, JsonFileMetadataStore, LocalBlobStorage, MetadataStore};
pub use transport::{ConversationTransport, TransportEvent};

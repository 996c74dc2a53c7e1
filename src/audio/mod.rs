pub mod backend;
pub mod decode;
pub mod inject;
pub mod mixer;

pub use backend::{conform, AudioFrame, AudioSpec, SourceKind, VideoFrame};
pub use decode::{decode_clip, DecodedClip};
pub use inject::{AudioInjector, ClipFetcher, HttpClipFetcher};
pub use mixer::{AudioGraph, MixerConfig};

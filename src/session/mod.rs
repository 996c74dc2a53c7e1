//! Session orchestration
//!
//! This module provides the `SessionOrchestrator` that sequences:
//! - Media acquisition and the audio mixing graph
//! - Chunked capture of the combined stream
//! - The conversational transport connection
//! - Teardown, artifact upload and metadata persistence

mod config;
mod orchestrator;
mod record;
mod state;

pub use config::SessionConfig;
pub use orchestrator::{SessionOrchestrator, SessionPorts, StartOutcome, StopReport};
pub use record::{FinalizedRecording, RecordingSession, RecordingUpdate, SessionRecord};
pub use state::SessionState;

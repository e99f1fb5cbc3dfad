// Whisper-AT API Library
//
// This crate provides an HTTP API for audio transcription and audio-event
// tagging using Whisper-AT. Uploads are normalized to 16 kHz mono, queued
// behind a bounded FIFO dispatcher and run on one or more exclusive model
// instances.

pub mod audio;
pub mod config;
pub mod config_loader;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod file_utils;
pub mod handlers;
pub mod models;
pub mod readiness;
pub mod text_filter;

// Re-export common types for easier access
pub use audio::{normalize, AudioError, AudioFormat, AudioInput, NormalizedAudio};
pub use config::{ApiConfig, EngineConfig};
pub use dispatcher::{DispatchError, JobDispatcher, JobHandle, TranscriptionJob};
pub use engine::{EngineError, SpeechEngine, WhisperAtEngine};
pub use error::HandlerError;
pub use handlers::{api_status, health, root, transcribe};
pub use models::{TranscriptionParams, TranscriptionResult};
pub use readiness::Readiness;

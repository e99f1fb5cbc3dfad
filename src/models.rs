// Whisper-AT API data models
//
// Request parameters and the wire-level response types shared between the
// inference engine, the post-processing layer and the HTTP handlers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default values for transcription parameters
pub mod param_defaults {
    /// Temporal resolution for audio tagging, in seconds
    pub const AUDIO_TAGGING_TIME_RESOLUTION: u32 = 10;

    /// Sampling temperature
    pub const TEMPERATURE: f64 = 0.01;

    /// Probability threshold above which a segment counts as non-speech
    pub const NO_SPEECH_THRESHOLD: f64 = 0.4;
}

/// A parameter value outside its documented range
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ParamBoundsError {
    /// Name of the offending form field
    pub field: &'static str,
    /// Human-readable description of the violation
    pub reason: String,
}

/// Tunable parameters for a transcription request
///
/// Absent form fields take the documented defaults; out-of-range values are
/// rejected by [`TranscriptionParams::validate`] rather than clamped, so an
/// invalid request never reaches the job queue.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionParams {
    /// Temporal resolution for audio tagging, in seconds (> 0)
    pub audio_tagging_time_resolution: u32,
    /// Sampling temperature in [0, 1]
    pub temperature: f64,
    /// No-speech probability threshold in [0, 1]
    pub no_speech_threshold: f64,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            audio_tagging_time_resolution: param_defaults::AUDIO_TAGGING_TIME_RESOLUTION,
            temperature: param_defaults::TEMPERATURE,
            no_speech_threshold: param_defaults::NO_SPEECH_THRESHOLD,
        }
    }
}

impl TranscriptionParams {
    /// Check every field against its documented range
    pub fn validate(&self) -> Result<(), ParamBoundsError> {
        if self.audio_tagging_time_resolution == 0 {
            return Err(ParamBoundsError {
                field: "audio_tagging_time_resolution",
                reason: "must be a positive number of seconds".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ParamBoundsError {
                field: "temperature",
                reason: format!("{} is outside [0, 1]", self.temperature),
            });
        }
        if !(0.0..=1.0).contains(&self.no_speech_threshold) {
            return Err(ParamBoundsError {
                field: "no_speech_threshold",
                reason: format!("{} is outside [0, 1]", self.no_speech_threshold),
            });
        }
        Ok(())
    }
}

/// Transcription result as produced by the inference engine and, after
/// post-processing, returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcript text
    pub text: String,
    /// Timed speech segments
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
    /// Labeled non-speech audio events
    #[serde(default)]
    pub audio_tags: Vec<AudioTag>,
}

/// A timed transcript segment
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptionSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Segment text
    pub text: String,
    /// Model probability that the segment contains no speech
    #[serde(default)]
    pub no_speech_prob: f64,
}

/// A labeled audio event covering a time range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTag {
    /// Start of the tagged range in seconds
    pub start: f64,
    /// End of the tagged range in seconds
    pub end: f64,
    /// Event label (e.g. "Music", "Applause")
    pub label: String,
    /// Model confidence for the label
    pub confidence: f64,
}

/// Error response for API
#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

/// Response for the health endpoint
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" once the model instances are loaded, "loading" before
    pub status: String,
}

/// Response for the status endpoint
#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    /// Whether the service has finished loading its model instances
    pub ready: bool,
    /// Jobs currently waiting in the queue
    pub queued_jobs: usize,
    /// Jobs currently running on a model instance
    pub running_jobs: usize,
    /// Maximum number of queued jobs before submissions are rejected
    pub queue_capacity: usize,
    /// Number of loaded model instances consuming the queue
    pub model_instances: usize,
}

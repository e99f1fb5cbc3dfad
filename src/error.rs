// Error handling for the Whisper-AT API
//
// Every error crossing the normalizer, engine or dispatcher boundary is a
// typed value; this module is the single place where those values become
// external HTTP status codes.

use std::io;

use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::audio::AudioError;
use crate::dispatcher::DispatchError;
use crate::engine::EngineError;
use crate::models::{ErrorResponse, ParamBoundsError};

/// Errors that can occur in the Whisper-AT API handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Error while processing multipart form data
    #[error("Form error: {0}")]
    FormError(String),

    /// Error while persisting uploaded data
    #[error("File error: {0}")]
    FileError(#[from] io::Error),

    /// No audio file was provided
    #[error("No audio file provided in the request")]
    NoAudioFile,

    /// Upload container outside the supported set
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Upload that could not be decoded
    #[error("Could not decode audio: {0}")]
    DecodeError(String),

    /// Parameter outside its documented range
    #[error("{0}")]
    InvalidParameter(#[from] ParamBoundsError),

    /// Upload exceeding the configured size limit
    #[error("File too large: {0} bytes exceeds limit of {1} bytes")]
    FileTooLarge(usize, usize),

    /// The model has not finished loading
    #[error("Service is still loading its model")]
    NotReady,

    /// Backpressure: the job queue is at capacity
    #[error("Transcription queue is full, retry later")]
    Overloaded,

    /// Inference-side failure
    #[error("Transcription failed: {0}")]
    InferenceError(String),

    /// The job did not finish inside the request timeout
    #[error("Transcription timed out after {0} seconds")]
    Timeout(u64),

    /// Internal cancellation signal; a disconnected client never sees it
    #[error("Request canceled")]
    Canceled,

    /// Error when a completion channel fails
    #[error("Communication error: channel closed")]
    ChannelError,
}

impl HandlerError {
    /// Create a new FormError
    pub fn form_error<S: Into<String>>(msg: S) -> Self {
        Self::FormError(msg.into())
    }
}

impl ResponseError for HandlerError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            error: self.to_string(),
        };

        match self {
            HandlerError::FormError(_)
            | HandlerError::NoAudioFile
            | HandlerError::UnsupportedFormat(_)
            | HandlerError::DecodeError(_)
            | HandlerError::InvalidParameter(_) => HttpResponse::BadRequest().json(error_response),
            HandlerError::FileTooLarge(_, _) => {
                HttpResponse::PayloadTooLarge().json(error_response)
            }
            HandlerError::NotReady | HandlerError::Overloaded => {
                HttpResponse::ServiceUnavailable().json(error_response)
            }
            HandlerError::Timeout(_) => HttpResponse::GatewayTimeout().json(error_response),
            _ => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

/// Convert AudioError to HandlerError
impl From<AudioError> for HandlerError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::UnsupportedFormat(detail) => HandlerError::UnsupportedFormat(detail),
            AudioError::Decode(detail) => HandlerError::DecodeError(detail),
            AudioError::Encode(e) => {
                HandlerError::FileError(io::Error::new(io::ErrorKind::Other, e.to_string()))
            }
            AudioError::Io(e) => HandlerError::FileError(e),
        }
    }
}

/// Convert DispatchError to HandlerError
impl From<DispatchError> for HandlerError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::QueueFull(_) => HandlerError::Overloaded,
            DispatchError::Canceled => HandlerError::Canceled,
            DispatchError::Timeout(seconds) => HandlerError::Timeout(seconds),
            DispatchError::ChannelClosed => HandlerError::ChannelError,
            DispatchError::Engine(e) => match e {
                EngineError::ModelLoad(detail)
                | EngineError::Inference(detail)
                | EngineError::Unavailable(detail) => HandlerError::InferenceError(detail),
            },
        }
    }
}

// Multipart form processing for the Whisper-AT API
//
// Extracts the audio file and transcription parameters from an upload.
// Validation happens here, before a job exists: a request with a bad
// format or out-of-range parameter never touches the queue.

use actix_multipart::{Field, Multipart};
use futures::{StreamExt, TryStreamExt};

use crate::audio::AudioFormat;
use crate::config::ApiConfig;
use crate::error::HandlerError;
use crate::models::{ParamBoundsError, TranscriptionParams};

/// An uploaded audio file with its declared format
pub struct FileUpload {
    /// Raw file bytes
    pub data: Vec<u8>,
    /// Format derived from the uploaded file name
    pub format: AudioFormat,
}

/// Extract and validate multipart form data for a transcription request
///
/// Absent parameter fields keep their defaults; present ones must parse and
/// sit inside their documented ranges. The `file` field is required and its
/// extension must be on the allow-list.
pub async fn extract_form_data(
    mut form: Multipart,
    config: &ApiConfig,
) -> Result<(TranscriptionParams, FileUpload), HandlerError> {
    let mut params = TranscriptionParams::default();
    let mut upload: Option<FileUpload> = None;

    while let Ok(Some(mut field)) = form.try_next().await {
        let field_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|name| name.to_string()))
            .unwrap_or_default();

        match field_name.as_str() {
            "audio_tagging_time_resolution" => {
                let value = read_text_field(&mut field, "audio_tagging_time_resolution").await?;
                if !value.is_empty() {
                    params.audio_tagging_time_resolution =
                        parse_u32("audio_tagging_time_resolution", &value)?;
                }
            }
            "temperature" => {
                let value = read_text_field(&mut field, "temperature").await?;
                if !value.is_empty() {
                    params.temperature = parse_f64("temperature", &value)?;
                }
            }
            "no_speech_threshold" => {
                let value = read_text_field(&mut field, "no_speech_threshold").await?;
                if !value.is_empty() {
                    params.no_speech_threshold = parse_f64("no_speech_threshold", &value)?;
                }
            }
            "file" => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(|name| name.to_string()))
                    .ok_or(HandlerError::NoAudioFile)?;
                let format = AudioFormat::from_file_name(&file_name)?;

                let mut data = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| {
                        HandlerError::form_error(format!("Error processing file upload: {}", e))
                    })?;
                    if data.len() + chunk.len() > config.max_file_size {
                        return Err(HandlerError::FileTooLarge(
                            data.len() + chunk.len(),
                            config.max_file_size,
                        ));
                    }
                    data.extend_from_slice(&chunk);
                }

                upload = Some(FileUpload { data, format });
            }
            _ => {
                // Skip unknown fields
                while field.next().await.is_some() {}
            }
        }
    }

    let upload = upload.ok_or(HandlerError::NoAudioFile)?;
    if upload.data.is_empty() {
        return Err(HandlerError::form_error("uploaded file is empty"));
    }

    params.validate()?;

    Ok((params, upload))
}

/// Collect a text field into a trimmed string
async fn read_text_field(field: &mut Field, name: &str) -> Result<String, HandlerError> {
    let mut value = String::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            HandlerError::form_error(format!("Error reading field {}: {}", name, e))
        })?;
        if let Ok(s) = std::str::from_utf8(&chunk) {
            value.push_str(s);
        }
    }
    Ok(value.trim().to_string())
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, HandlerError> {
    value.parse().map_err(|_| {
        ParamBoundsError {
            field,
            reason: format!("'{}' is not a whole number", value),
        }
        .into()
    })
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, HandlerError> {
    value.parse().map_err(|_| {
        ParamBoundsError {
            field,
            reason: format!("'{}' is not a number", value),
        }
        .into()
    })
}

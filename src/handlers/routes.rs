// API route handlers for the Whisper-AT API
//
// The full request pipeline lives here: readiness gate, form extraction,
// audio normalization, dispatch to a model instance, post-processing, and
// the mapping of every outcome to the documented response shapes.

use std::sync::Arc;
use std::time::Duration;

use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpResponse};
use log::{error, info};

use crate::audio::{self, AudioInput};
use crate::config::ApiConfig;
use crate::dispatcher::{JobDispatcher, TranscriptionJob};
use crate::error::HandlerError;
use crate::file_utils::{cleanup_workspace, create_job_workspace, JobWorkspace};
use crate::handlers::form::{extract_form_data, FileUpload};
use crate::models::{HealthResponse, StatusResponse, TranscriptionParams};
use crate::readiness::Readiness;
use crate::text_filter;

/// Handler for transcription requests
///
/// Receives an audio file and parameters, normalizes the audio, submits a
/// job to the dispatcher and waits for the result. Requests arriving before
/// the model finished loading, or while the queue is at capacity, are
/// rejected with 503 without any work being done.
#[post("/transcribe/")]
pub async fn transcribe(
    form: Multipart,
    dispatcher: web::Data<Arc<JobDispatcher>>,
    readiness: web::Data<Readiness>,
    config: web::Data<ApiConfig>,
) -> Result<HttpResponse, HandlerError> {
    if !readiness.is_ready() {
        return Err(HandlerError::NotReady);
    }

    let (params, upload) = extract_form_data(form, &config).await?;

    let workspace = create_job_workspace(&config.temp_dir).map_err(|e| {
        error!("Failed to create job workspace: {}", e);
        HandlerError::FileError(e)
    })?;

    // The workspace is removed on every path once the outcome is known
    let outcome = run_transcription(upload, params, &workspace, &dispatcher, &config).await;
    cleanup_workspace(&workspace.folder);
    outcome
}

async fn run_transcription(
    upload: FileUpload,
    params: TranscriptionParams,
    workspace: &JobWorkspace,
    dispatcher: &JobDispatcher,
    config: &ApiConfig,
) -> Result<HttpResponse, HandlerError> {
    let folder = workspace.folder.clone();
    let input = AudioInput {
        data: upload.data,
        format: upload.format,
    };

    // Decoding and resampling are CPU-bound; keep them off the HTTP workers
    let normalized = web::block(move || audio::normalize(input, &folder))
        .await
        .map_err(|e| {
            error!("Normalization task failed: {}", e);
            HandlerError::form_error("audio normalization was interrupted")
        })??;

    let no_speech_threshold = params.no_speech_threshold;
    let job = TranscriptionJob::new(normalized, params);
    let job_id = job.id;

    let handle = dispatcher.submit(job).await?;
    let result = handle
        .wait(Duration::from_secs(config.request_timeout))
        .await?;

    info!("Job {} delivered", job_id);
    let cleaned = text_filter::post_process(result, no_speech_threshold);
    Ok(HttpResponse::Ok().json(cleaned))
}

/// Health check endpoint
///
/// Reports 200 only once every model instance is loaded. A launcher polls
/// this before starting anything that depends on the service.
#[get("/health")]
pub async fn health(readiness: web::Data<Readiness>) -> HttpResponse {
    if readiness.is_ready() {
        HttpResponse::Ok().json(HealthResponse {
            status: "ok".to_string(),
        })
    } else {
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "loading".to_string(),
        })
    }
}

/// API status endpoint with queue introspection
#[get("/status")]
pub async fn api_status(
    dispatcher: web::Data<Arc<JobDispatcher>>,
    readiness: web::Data<Readiness>,
) -> HttpResponse {
    let response = StatusResponse {
        ready: readiness.is_ready(),
        queued_jobs: dispatcher.queue_len().await,
        running_jobs: dispatcher.running_count().await,
        queue_capacity: dispatcher.capacity(),
        model_instances: dispatcher.instance_count(),
    };
    HttpResponse::Ok().json(response)
}

/// Welcome message for the root path
#[get("/")]
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Welcome to the Whisper-AT Transcription API. Use the /transcribe/ endpoint to transcribe audio files."
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, NormalizedAudio, TARGET_SAMPLE_RATE};
    use crate::engine::{EngineError, SpeechEngine};
    use crate::models::{AudioTag, TranscriptionResult};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Engine stub emitting empty text and contiguous audio tags over the
    /// input duration, the shape real silence produces
    struct SilenceEngine {
        invocations: AtomicUsize,
    }

    impl SilenceEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SpeechEngine for SilenceEngine {
        async fn transcribe(
            &self,
            audio: &NormalizedAudio,
            params: &TranscriptionParams,
        ) -> Result<TranscriptionResult, EngineError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let duration = audio.duration_secs.unwrap_or(0.0) as f64;
            let resolution = params.audio_tagging_time_resolution as f64;

            let mut audio_tags = Vec::new();
            let mut t = 0.0;
            while t < duration {
                let end = (t + resolution).min(duration);
                audio_tags.push(AudioTag {
                    start: t,
                    end,
                    label: "Silence".to_string(),
                    confidence: 0.88,
                });
                t = end;
            }

            Ok(TranscriptionResult {
                text: String::new(),
                segments: Vec::new(),
                audio_tags,
            })
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl SpeechEngine for FailingEngine {
        async fn transcribe(
            &self,
            _audio: &NormalizedAudio,
            _params: &TranscriptionParams,
        ) -> Result<TranscriptionResult, EngineError> {
            Err(EngineError::Inference("CUDA out of memory".to_string()))
        }
    }

    fn test_config() -> ApiConfig {
        let temp_dir = std::env::temp_dir().join(format!("whisper_at_api_http_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp_dir).unwrap();
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: "0".to_string(),
            http_workers: 1,
            temp_dir: temp_dir.to_string_lossy().into_owned(),
            queue_capacity: 4,
            model_instances: 1,
            request_timeout: 5,
            keep_alive: 5,
            max_file_size: 10_000_000,
        }
    }

    fn silent_wav(seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..(TARGET_SAMPLE_RATE as f32 * seconds) as usize {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    const BOUNDARY: &str = "----whisperattest";

    fn multipart_body(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn build_request(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/transcribe/")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(file, fields))
    }

    macro_rules! service {
        ($dispatcher:expr, $readiness:expr, $config:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(Arc::clone(&$dispatcher)))
                    .app_data(web::Data::new($readiness.clone()))
                    .app_data(web::Data::new($config.clone()))
                    .service(transcribe)
                    .service(health)
                    .service(api_status),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn silent_wav_end_to_end() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine.clone()]);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let wav = silent_wav(0.5);
        let request = build_request(Some(("silence.wav", &wav)), &[]).to_request();
        let result: TranscriptionResult = test::call_and_read_body_json(&app, request).await;

        assert!(result.text.is_empty());
        assert!(!result.audio_tags.is_empty());
        // Tags are contiguous and cover the full duration
        let mut expected_start = 0.0;
        for tag in &result.audio_tags {
            assert!((tag.start - expected_start).abs() < 1e-6);
            expected_start = tag.end;
        }
        assert!((expected_start - 0.5).abs() < 0.05);
    }

    #[actix_web::test]
    async fn unsupported_upload_never_reaches_the_queue() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine.clone()]);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        // Renamed text file: wrong extension
        let request = build_request(Some(("notes.txt", b"just some words")), &[]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Right extension, garbage bytes
        let request = build_request(Some(("notes.wav", b"just some words")), &[]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(dispatcher.queue_len().await, 0);
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn missing_file_field_is_a_client_error() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine]);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let request = build_request(None, &[("temperature", "0.2")]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn out_of_range_parameters_are_rejected() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine.clone()]);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let wav = silent_wav(0.1);
        let request = build_request(Some(("clip.wav", &wav)), &[("temperature", "5")]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn requests_before_readiness_get_service_unavailable() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine]);
        let readiness = Readiness::new();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let wav = silent_wav(0.1);
        let request = build_request(Some(("clip.wav", &wav)), &[]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn health_tracks_readiness() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine]);
        let readiness = Readiness::new();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();
        let response =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn full_queue_maps_to_service_unavailable() {
        // No consumers attached: submitted jobs stay queued
        let dispatcher = JobDispatcher::new(1);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let filler = dispatcher
            .submit(TranscriptionJob::new(
                NormalizedAudio {
                    path: PathBuf::from("filler.wav"),
                    format: AudioFormat::Wav,
                    sample_rate: TARGET_SAMPLE_RATE,
                    channels: 1,
                    duration_secs: Some(1.0),
                    resampled: false,
                },
                TranscriptionParams::default(),
            ))
            .await
            .unwrap();

        let wav = silent_wav(0.1);
        let request = build_request(Some(("clip.wav", &wav)), &[]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        drop(filler);
    }

    #[actix_web::test]
    async fn inference_failure_maps_to_server_error() {
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![Arc::new(FailingEngine) as Arc<dyn SpeechEngine>]);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let wav = silent_wav(0.1);
        let request = build_request(Some(("clip.wav", &wav)), &[]).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn status_reports_queue_state() {
        let engine = SilenceEngine::new();
        let dispatcher = JobDispatcher::new(4);
        dispatcher.start(vec![engine]);
        let readiness = Readiness::new();
        readiness.mark_ready();
        let config = test_config();
        let app = service!(dispatcher, readiness, config);

        let status: StatusResponse = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/status").to_request(),
        )
        .await;
        assert!(status.ready);
        assert_eq!(status.queued_jobs, 0);
        assert_eq!(status.running_jobs, 0);
        assert_eq!(status.queue_capacity, 4);
        assert_eq!(status.model_instances, 1);
    }
}

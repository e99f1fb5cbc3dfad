// Inference gateway for the Whisper-AT API
//
// The model itself is an opaque capability living in a runner subprocess:
// one long-lived child per model instance, loaded once at startup, spoken to
// over line-delimited JSON on stdin/stdout. Model state is not safe for
// parallel use, so each instance serves exactly one invocation at a time;
// the dispatcher's worker task is the only caller and owns its instance.

use std::process::Stdio;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::audio::NormalizedAudio;
use crate::config::EngineConfig;
use crate::models::{TranscriptionParams, TranscriptionResult};

/// Inference gateway error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// The runner failed to start or to confirm its model load
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    /// The model rejected or failed a single transcription; the job fails
    /// but the instance keeps serving
    #[error("inference failed: {0}")]
    Inference(String),
    /// The runner process is gone; the service cannot recover this instance
    #[error("inference runner unavailable: {0}")]
    Unavailable(String),
}

/// The opaque transcription capability: normalized audio plus parameters in,
/// structured result out. Results are not deterministic for temperature > 0.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        params: &TranscriptionParams,
    ) -> Result<TranscriptionResult, EngineError>;
}

/// One request line sent to the runner per job
#[derive(Serialize)]
struct RunnerRequest<'a> {
    audio_path: &'a str,
    at_time_res: u32,
    temperature: f64,
    no_speech_threshold: f64,
}

/// One reply line received from the runner per job
#[derive(Deserialize)]
struct RunnerReply {
    #[serde(default)]
    result: Option<TranscriptionResult>,
    #[serde(default)]
    error: Option<String>,
}

/// Handshake line the runner prints once its model is in memory
#[derive(Deserialize)]
struct RunnerHello {
    status: String,
}

struct RunnerIo {
    // Held for its lifetime; killed on drop
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Production engine backed by a whisper_at runner subprocess
pub struct WhisperAtEngine {
    instance: usize,
    io: Mutex<RunnerIo>,
}

impl WhisperAtEngine {
    /// Spawn the runner for one model instance and wait for its ready
    /// handshake. Loading pins the model into GPU memory, so this is the
    /// slow part of service startup.
    pub async fn load(config: &EngineConfig, instance: usize) -> Result<Self, EngineError> {
        info!(
            "Loading model '{}' on device {} (instance {})",
            config.model, config.device, instance
        );

        let mut child = Command::new(&config.runner_cmd)
            .arg("--model")
            .arg(&config.model)
            .arg("--device")
            .arg(&config.device)
            .arg("--device-index")
            .arg(instance.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::ModelLoad(format!(
                    "failed to start runner '{}': {}",
                    config.runner_cmd, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ModelLoad("runner stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ModelLoad("runner stdout not captured".to_string()))?;

        let mut io = RunnerIo {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let mut line = String::new();
        let read = io
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| EngineError::ModelLoad(format!("reading handshake: {}", e)))?;
        if read == 0 {
            return Err(EngineError::ModelLoad(
                "runner exited before confirming model load".to_string(),
            ));
        }

        let hello: RunnerHello = serde_json::from_str(&line)
            .map_err(|e| EngineError::ModelLoad(format!("malformed handshake: {}", e)))?;
        if hello.status != "ready" {
            return Err(EngineError::ModelLoad(format!(
                "runner reported status '{}'",
                hello.status
            )));
        }

        info!("Model instance {} ready", instance);
        Ok(Self {
            instance,
            io: Mutex::new(io),
        })
    }

    /// Index of the model instance this engine drives
    pub fn instance(&self) -> usize {
        self.instance
    }
}

#[async_trait]
impl SpeechEngine for WhisperAtEngine {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        params: &TranscriptionParams,
    ) -> Result<TranscriptionResult, EngineError> {
        let audio_path = audio
            .path
            .to_str()
            .ok_or_else(|| EngineError::Inference("audio path is not valid UTF-8".to_string()))?;

        let request = RunnerRequest {
            audio_path,
            at_time_res: params.audio_tagging_time_resolution,
            temperature: params.temperature,
            no_speech_threshold: params.no_speech_threshold,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| EngineError::Inference(format!("encoding request: {}", e)))?;
        line.push('\n');

        let mut io = self.io.lock().await;

        io.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::Unavailable(format!("runner stdin closed: {}", e)))?;
        io.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Unavailable(format!("runner stdin closed: {}", e)))?;

        let mut reply_line = String::new();
        let read = io
            .stdout
            .read_line(&mut reply_line)
            .await
            .map_err(|e| EngineError::Unavailable(format!("reading runner reply: {}", e)))?;
        if read == 0 {
            return Err(EngineError::Unavailable(
                "runner exited mid-inference".to_string(),
            ));
        }

        let reply: RunnerReply = serde_json::from_str(&reply_line)
            .map_err(|e| EngineError::Inference(format!("malformed runner reply: {}", e)))?;

        match (reply.result, reply.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(EngineError::Inference(error)),
            (None, None) => Err(EngineError::Inference(
                "runner reply carried neither result nor error".to_string(),
            )),
        }
    }
}

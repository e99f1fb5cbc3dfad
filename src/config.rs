// Whisper-AT API configuration
//
// Centralizes configuration for the HTTP surface, the job queue and the
// inference runner. Values come from environment variables (optionally
// seeded from a TOML file, see config_loader) with application defaults.

use std::env;

use thiserror::Error;

/// Default values for configuration
pub mod defaults {
    // Server bind address
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: &str = "9007";

    // Temporary directory for per-job workspaces
    pub const TEMP_DIR: &str = "/home/llm/whisper_at_api/tmp";

    // Bounded queue capacity; submissions beyond this are rejected
    pub const QUEUE_CAPACITY: usize = 16;

    // Loaded model instances (one GPU slot each)
    pub const MODEL_INSTANCES: usize = 1;

    // How long a request waits for its transcription before giving up
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 480;

    // HTTP keep-alive
    pub const KEEPALIVE_SECONDS: u64 = 480;

    // Maximum accepted upload size (512MB)
    pub const MAX_FILE_SIZE: usize = 536_870_912;

    // Inference runner subprocess
    pub const RUNNER_CMD: &str = "/home/llm/whisper_at_api/whisper_at_runner.sh";
    pub const MODEL: &str = "base";
    pub const DEVICE: &str = "cuda";
}

/// Configuration error raised by startup validation
#[derive(Error, Debug)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(String);

/// Configuration for the HTTP surface and the job pipeline
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind
    pub host: String,
    /// Port to bind
    pub port: String,
    /// Number of HTTP worker threads
    pub http_workers: usize,
    /// Directory for per-job workspaces
    pub temp_dir: String,
    /// Queue capacity before submissions are rejected
    pub queue_capacity: usize,
    /// Number of model instances to load
    pub model_instances: usize,
    /// Seconds a request waits on its job before timing out
    pub request_timeout: u64,
    /// HTTP keep-alive seconds
    pub keep_alive: u64,
    /// Maximum upload size in bytes
    pub max_file_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: env::var("WHISPER_AT_API_HOST").unwrap_or_else(|_| defaults::HOST.to_string()),
            port: env::var("WHISPER_AT_API_PORT").unwrap_or_else(|_| defaults::PORT.to_string()),
            http_workers: env::var("WHISPER_AT_API_HTTP_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(num_cpus::get),
            temp_dir: env::var("WHISPER_AT_API_TMP_DIR")
                .unwrap_or_else(|_| defaults::TEMP_DIR.to_string()),
            queue_capacity: env::var("WHISPER_AT_API_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::QUEUE_CAPACITY),
            model_instances: env::var("WHISPER_AT_API_MODEL_INSTANCES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::MODEL_INSTANCES),
            request_timeout: env::var("WHISPER_AT_API_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::REQUEST_TIMEOUT_SECONDS),
            keep_alive: env::var("WHISPER_AT_API_KEEPALIVE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::KEEPALIVE_SECONDS),
            max_file_size: env::var("WHISPER_AT_API_MAX_FILE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::MAX_FILE_SIZE),
        }
    }
}

impl ApiConfig {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.parse::<u16>().is_err() {
            return Err(ConfigError(format!("port '{}' is not a number", self.port)));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError("queue capacity must be at least 1".to_string()));
        }
        if self.model_instances == 0 {
            return Err(ConfigError(
                "at least one model instance is required".to_string(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError(
                "request timeout must be positive; a pending request may never hang forever"
                    .to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(ConfigError("max file size must be positive".to_string()));
        }
        if self.http_workers == 0 {
            return Err(ConfigError("http workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Ensures the temporary directory exists
    pub fn ensure_temp_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
    }
}

/// Configuration for the inference runner subprocess
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Path to the runner command
    pub runner_cmd: String,
    /// Model name to load (tiny, base, small, medium, large, ...)
    pub model: String,
    /// Inference device
    pub device: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runner_cmd: env::var("WHISPER_AT_RUNNER_CMD")
                .unwrap_or_else(|_| defaults::RUNNER_CMD.to_string()),
            model: env::var("WHISPER_AT_MODEL").unwrap_or_else(|_| defaults::MODEL.to_string()),
            device: env::var("WHISPER_AT_DEVICE").unwrap_or_else(|_| defaults::DEVICE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ApiConfig {
        ApiConfig {
            host: defaults::HOST.to_string(),
            port: defaults::PORT.to_string(),
            http_workers: 4,
            temp_dir: defaults::TEMP_DIR.to_string(),
            queue_capacity: defaults::QUEUE_CAPACITY,
            model_instances: defaults::MODEL_INSTANCES,
            request_timeout: defaults::REQUEST_TIMEOUT_SECONDS,
            keep_alive: defaults::KEEPALIVE_SECONDS,
            max_file_size: defaults::MAX_FILE_SIZE,
        }
    }

    #[test]
    fn default_shape_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = ApiConfig {
            queue_capacity: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_instances_are_rejected() {
        let config = ApiConfig {
            model_instances: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ApiConfig {
            request_timeout: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let config = ApiConfig {
            port: "ninety".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }
}

// Configuration file loader for the Whisper-AT API
//
// Reads a flat TOML file and seeds the process environment from it.
// Precedence, highest first: real environment variables, file values,
// application defaults (applied by the config module).

use std::env;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use toml::Value;

/// Default configuration file, looked up in the working directory
const CONFIG_FILE_PATH: &str = "whisper_at_api.conf";

/// Load the default configuration file if present. Returns true when the
/// file existed and parsed.
pub fn load_config() -> bool {
    apply_config_file(Path::new(CONFIG_FILE_PATH))
}

/// Seed environment variables from a flat TOML file. Keys already present
/// in the environment are left alone so operators can override the file.
pub fn apply_config_file(path: &Path) -> bool {
    if !path.exists() {
        debug!("Configuration file not found at: {}", path.display());
        return false;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read configuration file: {}", e);
            return false;
        }
    };

    let table = match content.parse::<Value>() {
        Ok(Value::Table(table)) => table,
        Ok(_) => {
            warn!(
                "Configuration file {} is not a TOML table",
                path.display()
            );
            return false;
        }
        Err(e) => {
            warn!("Failed to parse configuration file: {}", e);
            return false;
        }
    };

    let mut applied = 0;
    for (key, value) in table {
        let rendered = match value {
            Value::String(s) => s,
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            _ => {
                warn!("Skipping unsupported TOML value type for key: {}", key);
                continue;
            }
        };

        if env::var(&key).is_err() {
            debug!("Setting env var from config file: {} = {}", key, rendered);
            env::set_var(&key, rendered);
            applied += 1;
        } else {
            debug!("Env var already set, keeping environment value: {}", key);
        }
    }

    info!(
        "Configuration loaded from {} ({} values applied)",
        path.display(),
        applied
    );
    true
}

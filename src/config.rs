use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Envelope `source` for every event this service publishes.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Per-topic capacity of the in-process bus.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            event_buffer_size: default_event_buffer_size(),
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl SystemConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        from_file(path)
    }
}

pub fn from_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)?;
    Ok(config)
}

pub fn from_str<T: DeserializeOwned>(s: &str) -> ConfigResult<T> {
    let config = serde_json::from_str(s)?;
    Ok(config)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn default_service_name() -> String {
    "eventwire".to_string()
}

fn default_event_buffer_size() -> usize {
    1000
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(6)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

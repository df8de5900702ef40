use std::{env, net::SocketAddr, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Runtime settings. Every value has a default so the service starts with no
/// environment at all.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    pub model_input_op: String,
    pub model_output_op: String,
    pub disease_data_path: PathBuf,
    pub upload_dir: PathBuf,
    pub public_base_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let body_limit_bytes = {
            let raw = var("BODY_LIMIT_MB", "10");
            let mb = raw.parse::<usize>().map_err(|_| ConfigError::Invalid {
                name: "BODY_LIMIT_MB",
                expected: "a valid integer",
                value: raw.clone(),
            })?;
            mb * 1024 * 1024
        };

        let port = {
            let raw = var("PORT", "5000");
            raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                expected: "a valid number between 0 and 65535",
                value: raw.clone(),
            })?
        };

        Ok(Settings {
            host: var("HOST", "0.0.0.0"),
            port,
            body_limit_bytes,
            model_path: var("MODEL_PATH", "./model/frozen_graph.pb").into(),
            model_url: lookup("MODEL_URL").filter(|url| !url.is_empty()),
            model_input_op: var("MODEL_INPUT_OP", "x"),
            model_output_op: var("MODEL_OUTPUT_OP", "Identity"),
            disease_data_path: var("DISEASE_DATA_PATH", "data/disease_data.json").into(),
            upload_dir: var("UPLOAD_DIR", "static/uploads").into(),
            public_base_url: lookup("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        })
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::Invalid {
            name: "HOST",
            expected: "an IP address",
            value: self.host.clone(),
        })
    }
}

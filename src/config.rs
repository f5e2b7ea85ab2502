//! Server configuration
//!
//! Built from CLI flags / environment variables in `main.rs`; everything has
//! a default so the server can start with no arguments.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Long-side input size every model is run at
pub const INPUT_SIZE: u32 = 1024;

/// Confidence threshold used when the request does not carry one
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Accepted upload extensions (lowercase, dotted)
pub const SUPPORTED_FORMATS: [&str; 6] = [".jpg", ".jpeg", ".png", ".bmp", ".tiff", ".webp"];

/// Default weights filename inside each model directory
pub const DEFAULT_WEIGHTS_FILE: &str = "best.pt";

/// Configuration error
#[derive(Error, Debug)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// Device the detection backend should run on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA if available, otherwise CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            other => Err(ConfigError(format!("unknown device '{}'", other))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda => write!(f, "cuda"),
        }
    }
}

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory containing one subdirectory per model
    pub models_root: PathBuf,
    /// Weights filename expected inside each model directory
    pub weights_file: String,
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Where uploaded images are staged (system temp dir when unset)
    pub upload_dir: Option<PathBuf>,
    /// Request body limit for uploads, in bytes
    pub max_upload_bytes: usize,
    /// Inference device
    pub device: DevicePreference,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            models_root: PathBuf::from("models"),
            weights_file: DEFAULT_WEIGHTS_FILE.to_string(),
            host: "0.0.0.0".to_string(),
            port: 8081,
            upload_dir: None,
            max_upload_bytes: 32 * 1024 * 1024,
            device: DevicePreference::Auto,
        }
    }
}

impl ServerConfig {
    /// Resolve host and port into a socket address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError(format!("invalid bind address {}:{}: {}", self.host, self.port, e)))
    }

    /// Convert an upload limit given in megabytes to bytes
    pub fn upload_limit_from_mb(megabytes: usize) -> Result<usize, ConfigError> {
        megabytes
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError(format!("upload limit of {} MB does not fit in memory", megabytes)))
    }

    /// Directory scoped upload artifacts are created in
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.models_root, PathBuf::from("models"));
        assert_eq!(config.weights_file, "best.pt");
        assert_eq!(config.port, 8081);
        assert_eq!(config.device, DevicePreference::Auto);
    }

    #[test]
    fn test_bind_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:9000");

        let bad = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_upload_dir_falls_back_to_temp() {
        let config = ServerConfig::default();
        assert_eq!(config.upload_dir(), std::env::temp_dir());
    }

    #[test]
    fn test_upload_limit_from_mb() {
        assert_eq!(ServerConfig::upload_limit_from_mb(32).unwrap(), 32 * 1024 * 1024);
        assert_eq!(ServerConfig::upload_limit_from_mb(0).unwrap(), 0);
        assert!(ServerConfig::upload_limit_from_mb(usize::MAX).is_err());
        assert!(ServerConfig::upload_limit_from_mb(usize::MAX / 1024 + 1).is_err());
    }

    #[test]
    fn test_device_from_str() {
        assert_eq!("CUDA".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("cpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }
}

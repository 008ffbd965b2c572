use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("TLS certificate path is empty")]
    EmptyCertPath,

    #[error("TLS key path is empty")]
    EmptyKeyPath,
}

/// Ingestion endpoint configuration.
///
/// When a `tls` section is present the service listens with TLS on that
/// section's listener instead of the plaintext one.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Plaintext listener for incoming batches
    pub listener: Listener,
    /// Optional TLS listener; supersedes the plaintext one when set
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            tls: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TlsConfig {
    #[serde(default = "TlsConfig::default_listener")]
    pub listener: Listener,
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

impl TlsConfig {
    fn default_listener() -> Listener {
        Listener {
            host: "0.0.0.0".to_string(),
            port: 8443,
        }
    }

    /// Build a TLS section from a mounted secret directory holding
    /// `tls.crt` and `tls.key` (the layout of a Kubernetes TLS secret).
    pub fn from_secret_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        TlsConfig {
            listener: Self::default_listener(),
            cert: dir.join("tls.crt"),
            key: dir.join("tls.key"),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if self.cert.as_os_str().is_empty() {
            return Err(ValidationError::EmptyCertPath);
        }
        if self.key.as_os_str().is_empty() {
            return Err(ValidationError::EmptyKeyPath);
        }
        Ok(())
    }
}

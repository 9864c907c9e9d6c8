use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertManagerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate certificate: {0}")]
    Duplicate(String),

    #[error("Expected exactly one CA certificate file, found {0}")]
    AmbiguousCa(usize),

    #[error("Decoding error: {0}")]
    Codec(String),

    #[error("Certificate generation error: {0}")]
    Crypto(#[from] rcgen::Error),

    #[error("Keystore export error: {0}")]
    Keystore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CertManagerError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("unsupported cipher version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("corrupt blob: {0}")]
    CorruptBlob(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

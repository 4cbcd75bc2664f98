use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no pairing code is active")]
    NoPairingActive,

    #[error("pairing code expired")]
    CodeExpired,

    #[error("pairing code does not match")]
    CodeMismatch,

    #[error("account backend rejected the token")]
    AccountRejected,

    #[error("no account backend is configured")]
    NoAccountBackend,

    #[error("device not found")]
    DeviceNotFound,

    #[error(transparent)]
    Vault(#[from] torbo_vault::VaultError),
}

pub type Result<T> = std::result::Result<T, AuthError>;

//! Device pairing, bearer tokens, and the encrypted keychain store.

pub mod device;
pub mod error;
pub mod pairing;
pub mod registry;
pub mod store;

pub use {
    device::{KeychainData, PairedDevice, UserAccount, generate_pairing_code, generate_token},
    error::AuthError,
    pairing::{AccountBackend, PairingManager},
    registry::TokenRegistry,
    store::SecretStore,
};

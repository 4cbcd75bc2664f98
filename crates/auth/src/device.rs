//! Paired-device identity and token/code generation.

use std::collections::HashMap;

use {
    chrono::{DateTime, Duration, Utc},
    serde::{Deserialize, Serialize},
};

/// A client that has completed pairing. Tokens are never regenerated; a
/// device that loses its token pairs again as a new device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedDevice {
    pub id: String,
    pub name: String,
    pub token: String,
    pub paired_at: DateTime<Utc>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl PairedDevice {
    /// The device's most recent activity: `max(last_seen, paired_at)`.
    pub fn last_activity(&self) -> DateTime<Utc> {
        match self.last_seen {
            Some(seen) => seen.max(self.paired_at),
            None => self.paired_at,
        }
    }

    /// Idle-expiry check, evaluated at call time.
    pub fn is_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity() > window
    }
}

/// Linked user account record (populated by `POST /pair/auth`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub display_name: Option<String>,
    pub linked_at: DateTime<Utc>,
}

/// Everything that lives inside `keychain.enc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeychainData {
    pub devices: Vec<PairedDevice>,
    pub user_account: Option<UserAccount>,
    pub provider_keys: HashMap<String, String>,
}

/// Pairing-code alphabet: no 0/O, 1/I ambiguity.
const PAIRING_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of pairing codes.
pub const PAIRING_CODE_LEN: usize = 6;

/// Generate a 6-character pairing code.
pub fn generate_pairing_code() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    (0..PAIRING_CODE_LEN)
        .map(|_| PAIRING_ALPHABET[rng.random_range(0..PAIRING_ALPHABET.len())] as char)
        .collect()
}

/// Generate a device bearer token: 32 random bytes, base64url, no padding.
pub fn generate_token() -> String {
    use {base64::Engine, rand::RngCore};

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time string comparison (prevents timing attacks on tokens).
pub(crate) fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_code_uses_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), PAIRING_CODE_LEN);
            for c in code.bytes() {
                assert!(PAIRING_ALPHABET.contains(&c), "unexpected char {}", c as char);
            }
        }
    }

    #[test]
    fn tokens_are_unique_and_unpadded() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
        assert!(!t1.contains('='));
        // 32 bytes → 43 base64url chars without padding.
        assert_eq!(t1.len(), 43);
    }

    #[test]
    fn safe_equal_basic() {
        assert!(safe_equal("abc", "abc"));
        assert!(!safe_equal("abc", "abd"));
        assert!(!safe_equal("abc", "abcd"));
        assert!(safe_equal("", ""));
    }

    #[test]
    fn last_activity_prefers_latest() {
        let paired = Utc::now() - Duration::days(10);
        let mut device = PairedDevice {
            id: "d1".into(),
            name: "phone".into(),
            token: generate_token(),
            paired_at: paired,
            last_seen: None,
            user_id: None,
        };
        assert_eq!(device.last_activity(), paired);

        let seen = Utc::now() - Duration::days(2);
        device.last_seen = Some(seen);
        assert_eq!(device.last_activity(), seen);

        // A stale last_seen never wins over paired_at.
        device.last_seen = Some(paired - Duration::days(5));
        assert_eq!(device.last_activity(), paired);
    }

    #[test]
    fn expiry_is_evaluated_against_window() {
        let now = Utc::now();
        let device = PairedDevice {
            id: "d1".into(),
            name: "phone".into(),
            token: generate_token(),
            paired_at: now - Duration::days(31),
            last_seen: None,
            user_id: None,
        };
        assert!(device.is_expired(Duration::days(30), now));
        assert!(!device.is_expired(Duration::days(60), now));

        let mut fresh = device.clone();
        fresh.last_seen = Some(now - Duration::days(1));
        assert!(!fresh.is_expired(Duration::days(30), now));
    }
}

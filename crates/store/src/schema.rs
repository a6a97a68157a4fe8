use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque chat identity. Telegram chat ids are signed 64-bit integers.
pub type OwnerId = i64;

/// SHA-224 digest of a URL's fetched content, hex-encoded.
///
/// Fixed length (56 hex characters); used to detect content change without
/// storing the content itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest the exact response bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha224};
        let mut h = Sha224::new();
        h.update(bytes);
        Self(format!("{:x}", h.finalize()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One account row. Accounts own watches and comments; deleting the account
/// cascades to both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub created_at: DateTime<Utc>,
}

/// A single (owner, URL) subscription with its last-known fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEntry {
    pub owner: OwnerId,
    pub url: String,
    pub fingerprint: Fingerprint,
    /// Global monotonic insertion sequence; lists are returned in `seq`
    /// order so users see their URLs in the order they followed them.
    pub seq: u64,
    pub last_checked: DateTime<Utc>,
}

/// One feedback message left by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEntry {
    pub owner: OwnerId,
    /// Per-owner creation sequence.
    pub seq: u64,
    pub text: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha224_hex() {
        let fp = Fingerprint::digest(b"");
        // SHA-224 of the empty string.
        assert_eq!(
            fp.as_hex(),
            "d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f"
        );
        assert_eq!(fp.as_hex().len(), 56);
    }

    #[test]
    fn digest_differs_on_content_change() {
        let a = Fingerprint::digest(b"<html>one</html>");
        let b = Fingerprint::digest(b"<html>two</html>");
        assert_ne!(a, b);
        assert_eq!(a, Fingerprint::digest(b"<html>one</html>"));
    }
}

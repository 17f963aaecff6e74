//! Single-use confirmation tokens for destructive resets.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::security::crypto::{digests_match, random_bytes};

const TOKEN_SIZE: usize = 32;

/// Handed to the host after the user confirms a reset; passed back verbatim.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct Pending {
    secret: Zeroizing<[u8; TOKEN_SIZE]>,
    expires_at: DateTime<Utc>,
}

/// Holds at most one outstanding token. Issuing replaces it; any redeem
/// attempt consumes it.
#[derive(Default)]
pub(crate) struct ResetTokens {
    pending: Option<Pending>,
}

impl ResetTokens {
    pub fn issue(&mut self, now: DateTime<Utc>, ttl: Duration) -> ResetToken {
        let secret = Zeroizing::new(random_bytes::<TOKEN_SIZE>());
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60));
        let expires_at = now + ttl;
        let token = hex::encode(&secret[..]);
        self.pending = Some(Pending { secret, expires_at });
        ResetToken { token, expires_at }
    }

    pub fn redeem(&mut self, presented: &str, now: DateTime<Utc>) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        if now >= pending.expires_at {
            return false;
        }
        match hex::decode(presented) {
            Ok(bytes) => digests_match(&bytes, &pending.secret[..]),
            Err(_) => false,
        }
    }
}

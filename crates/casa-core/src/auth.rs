//! Auth gate: signed, expiring bearer tokens.
//!
//! Token format: `casa1.<payload>.<sig>` where `payload` is
//! URL-safe-base64 JSON (`sub`, `exp`, `nonce`) and `sig` is
//! HMAC-SHA256 over the encoded payload. Verification is synchronous —
//! the connection-upgrade path calls it inline before admitting a
//! viewer, and request handlers call it per request. Connections are
//! NOT re-verified after upgrade; mid-session expiry is accepted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const TOKEN_PREFIX: &str = "casa1";

// ── Errors ───────────────────────────────────────────────────────────

/// Verification failures. All variants are surfaced to the caller as
/// "not authenticated" — the distinction only matters for logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credential supplied")]
    Missing,

    #[error("malformed token")]
    Malformed,

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

// ── Claims ───────────────────────────────────────────────────────────

/// The verified contents of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — an opaque viewer/user identifier.
    pub sub: String,
    /// Expiry as a unix timestamp (seconds).
    pub exp: i64,
    /// Random nonce so two tokens for the same subject differ.
    pub nonce: String,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

// ── AuthGate ─────────────────────────────────────────────────────────

/// Issues and verifies signed expiring tokens against a shared secret.
#[derive(Clone)]
pub struct AuthGate {
    secret: SecretString,
}

impl AuthGate {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Mint a token for `subject`, valid for `ttl` from now.
    pub fn issue(&self, subject: &str, ttl: Duration) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();

        let claims = Claims {
            sub: subject.to_owned(),
            exp: (Utc::now() + ttl).timestamp(),
            nonce,
        };

        // Claims serialization cannot fail: all fields are plain data.
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims).expect("claims serialize to JSON"),
        );
        let sig = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes()));

        format!("{TOKEN_PREFIX}.{payload}.{sig}")
    }

    /// Verify a token's signature and expiry, returning its claims.
    ///
    /// The signature is checked before the payload is parsed, so a
    /// forged payload is never deserialized.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let rest = token.strip_prefix(TOKEN_PREFIX).ok_or(AuthError::Malformed)?;
        let rest = rest.strip_prefix('.').ok_or(AuthError::Malformed)?;
        let (payload, sig) = rest.split_once('.').ok_or(AuthError::Malformed)?;

        let claimed_sig = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| AuthError::Malformed)?;
        let expected_sig = self.sign(payload.as_bytes());

        if !constant_time_eq(&claimed_sig, &expected_sig) {
            return Err(AuthError::BadSignature);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::Malformed)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, message: &[u8]) -> [u8; 32] {
        hmac_sha256(self.secret.expose_secret().as_bytes(), message)
    }
}

// ── HMAC-SHA256 (RFC 2104) ───────────────────────────────────────────

const SHA256_BLOCK: usize = 64;

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut key_block = [0u8; SHA256_BLOCK];
    if key.len() > SHA256_BLOCK {
        let digest = Sha256::digest(key);
        key_block
            .iter_mut()
            .zip(digest.iter())
            .for_each(|(b, d)| *b = *d);
    } else {
        key_block
            .iter_mut()
            .zip(key.iter())
            .for_each(|(b, k)| *b = *k);
    }

    let mut ipad = [0x36u8; SHA256_BLOCK];
    let mut opad = [0x5cu8; SHA256_BLOCK];
    for ((i, o), k) in ipad.iter_mut().zip(opad.iter_mut()).zip(key_block.iter()) {
        *i ^= *k;
        *o ^= *k;
    }

    let inner = Sha256::new()
        .chain_update(ipad)
        .chain_update(message)
        .finalize();
    Sha256::new()
        .chain_update(opad)
        .chain_update(inner)
        .finalize()
        .into()
}

/// Length-then-XOR-fold comparison that does not short-circuit on the
/// first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Tests ────────────────────────────────────────────────────────────

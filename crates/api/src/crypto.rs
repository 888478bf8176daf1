//! Password hashing, access tokens, and opaque random tokens.
//!
//! - PBKDF2-SHA256 password hashing (600k iterations, per-user salt)
//! - HS256 JWT access tokens carrying the user id in `sub`
//! - Random hex tokens for refresh and verification, stored as SHA-256 digests

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ServiceError;

const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const TOKEN_BYTES: usize = 32;

/// Access token lifetime: 1 hour.
pub const JWT_EXPIRY_SECS: u64 = 3600;

/// Refresh token lifetime: 7 days.
pub const REFRESH_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Verification / password-reset token lifetime: 24 hours.
pub const VERIFICATION_EXPIRY_SECS: u64 = 24 * 3600;

// ── Password hashing ────────────────────────────────────────────────────────

/// Hash a password with PBKDF2-SHA256. Returns `(hash_hex, salt_hex)`.
pub fn hash_password(password: &str) -> Result<(String, String), ServiceError> {
    let salt = random_bytes::<SALT_LEN>()?;
    let hash = derive(password, &salt);
    Ok((hex::encode(hash), hex::encode(salt)))
}

/// Check a password against a stored hash and salt (both hex-encoded).
pub fn verify_password(password: &str, hash_hex: &str, salt_hex: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    constant_time_eq(&derive(password, &salt), &expected)
}

fn derive(password: &str, salt: &[u8]) -> [u8; HASH_LEN] {
    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut hash);
    hash
}

// ── JWT (HS256) ─────────────────────────────────────────────────────────────

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// Sign an access token for `user_id`, valid for [`JWT_EXPIRY_SECS`].
pub fn sign_jwt(user_id: &str, secret: &str, now_unix: u64) -> String {
    let claims = serde_json::json!({
        "sub": user_id,
        "iat": now_unix,
        "exp": now_unix + JWT_EXPIRY_SECS,
    });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(JWT_HEADER),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(secret.as_bytes(), signing_input.as_bytes()));
    format!("{signing_input}.{signature}")
}

/// Verify an access token and return its subject (user id).
pub fn verify_jwt(token: &str, secret: &str, now_unix: u64) -> Result<String, ServiceError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ServiceError::Unauthorized("invalid token".into()));
    };

    let expected = hmac_sha256(secret.as_bytes(), format!("{header}.{payload}").as_bytes());
    let actual = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| ServiceError::Unauthorized("invalid token".into()))?;
    if !constant_time_eq(&expected, &actual) {
        return Err(ServiceError::Unauthorized("invalid token".into()));
    }

    let claims: Claims = URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| ServiceError::Unauthorized("invalid token".into()))?;

    if now_unix > claims.exp {
        return Err(ServiceError::Unauthorized("token expired".into()));
    }
    if claims.sub.is_empty() {
        return Err(ServiceError::Unauthorized("invalid token".into()));
    }
    Ok(claims.sub)
}

// ── Opaque tokens ───────────────────────────────────────────────────────────

/// 32 random bytes, hex-encoded. Used for refresh and verification tokens.
pub fn generate_token() -> Result<String, ServiceError> {
    Ok(hex::encode(random_bytes::<TOKEN_BYTES>()?))
}

/// SHA-256 digest of a token for storage, hex-encoded.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// ── Internal ────────────────────────────────────────────────────────────────

fn random_bytes<const N: usize>() -> Result<[u8; N], ServiceError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf)
        .map_err(|e| ServiceError::Internal(format!("RNG failure: {e}")))?;
    Ok(buf)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so `new_from_slice` cannot fail here.
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const HASH_SCHEME: &str = "pbkdf2_sha256";

// =============================================================================
// Password Hashing
// =============================================================================

/// Hash a password with PBKDF2-HMAC-SHA256
///
/// The result is self-describing so the iteration count can be raised later
/// without invalidating existing hashes:
/// `pbkdf2_sha256$<iterations>$<salt hex>$<hash hex>`
///
/// CPU-heavy: call from `spawn_blocking`.
pub fn hash_password(password: &str, iterations: u32) -> Result<String, AppError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt)
        .map_err(|e| AppError::Internal(format!("RNG failure: {e}")))?;

    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut hash);

    Ok(format!(
        "{HASH_SCHEME}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Verify a password against an encoded hash produced by [`hash_password`]
///
/// Malformed hashes never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt_hex), Some(hash_hex), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    if iterations == 0 || expected.len() != HASH_LEN {
        return false;
    }

    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut hash);

    constant_time_eq(&hash, &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// =============================================================================
// Access Tokens (HS256 JWT)
// =============================================================================

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
}

/// Sign an access token for `user_id`
pub fn sign_token(user_id: &str, secret: &str, now: i64, expiry_secs: i64) -> Result<String, AppError> {
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + expiry_secs,
    };
    let payload = serde_json::to_vec(&claims)
        .map_err(|e| AppError::Internal(format!("encoding claims: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(JWT_HEADER.as_bytes()),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = sign_hmac(signing_input.as_bytes(), secret)?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Verify an access token and return its claims
pub fn verify_token(token: &str, secret: &str, now: i64) -> Result<Claims, AppError> {
    let invalid = || AppError::Unauthorized("Invalid access token".to_string());

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
    if !verify_hmac(format!("{header}.{payload}").as_bytes(), &signature, secret) {
        tracing::warn!("Rejected access token with bad signature");
        return Err(invalid());
    }

    let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;

    if now >= claims.exp {
        return Err(AppError::Unauthorized("Access token expired".to_string()));
    }

    Ok(claims)
}

fn sign_hmac(data: &[u8], secret: &str) -> Result<Vec<u8>, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Failed to create HMAC instance".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify an HMAC-SHA256 signature in constant time
fn verify_hmac(data: &[u8], signature: &[u8], secret: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            return false;
        }
    };
    mac.update(data);
    mac.verify_slice(signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-0123456789";
    const ITERATIONS: u32 = 1_000;

    #[test]
    fn test_hash_and_verify_password() {
        let encoded = hash_password("correct horse", ITERATIONS).unwrap();
        assert!(encoded.starts_with("pbkdf2_sha256$1000$"));
        assert!(verify_password("correct horse", &encoded));
        assert!(!verify_password("wrong horse", &encoded));
    }

    #[test]
    fn test_hash_uses_random_salt() {
        let a = hash_password("same password", ITERATIONS).unwrap();
        let b = hash_password("same password", ITERATIONS).unwrap();
        assert_ne!(a, b);
        assert!(verify_password("same password", &a));
        assert!(verify_password("same password", &b));
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("pw", ""));
        assert!(!verify_password("pw", "pbkdf2_sha256$abc$00$00"));
        assert!(!verify_password("pw", "bcrypt$1000$00$00"));
        assert!(!verify_password("pw", "pbkdf2_sha256$1000$zz$00"));
        assert!(!verify_password("pw", "pbkdf2_sha256$1000$00$00$extra"));
        assert!(!verify_password("pw", "pbkdf2_sha256$1000$00$"));
        assert!(!verify_password("pw", &format!("pbkdf2_sha256$0$00${}", "0".repeat(64))));
    }

    #[test]
    fn test_token_roundtrip() {
        let now = 1_700_000_000;
        let token = sign_token("user-1", SECRET, now, 3600).unwrap();
        let claims = verify_token(&token, SECRET, now + 10).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp, now + 3600);
    }

    #[test]
    fn test_token_expired() {
        let now = 1_700_000_000;
        let token = sign_token("user-1", SECRET, now, 60).unwrap();
        let err = verify_token(&token, SECRET, now + 60).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_token_wrong_secret() {
        let now = 1_700_000_000;
        let token = sign_token("user-1", SECRET, now, 60).unwrap();
        assert!(verify_token(&token, "another-secret-value", now).is_err());
    }

    #[test]
    fn test_token_tampered_payload() {
        let now = 1_700_000_000;
        let token = sign_token("user-1", SECRET, now, 60).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = Claims {
            sub: "admin".to_string(),
            iat: now,
            exp: now + 60,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(verify_token(&forged, SECRET, now).is_err());
    }

    #[test]
    fn test_token_malformed() {
        assert!(verify_token("", SECRET, 0).is_err());
        assert!(verify_token("a.b", SECRET, 0).is_err());
        assert!(verify_token("a.b.c.d", SECRET, 0).is_err());
        assert!(verify_token("not.base64!.sig", SECRET, 0).is_err());
    }
}

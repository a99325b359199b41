//! Account secret hashing with PBKDF2-HMAC-SHA256.
//!
//! Stored format: `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::crypto;

const SCHEME: &str = "pbkdf2-sha256";
const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Secret hashing/verification errors.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("failed to generate salt: {0}")]
    Entropy(#[from] getrandom::Error),
    #[error("unrecognized secret hash format")]
    BadFormat,
}

/// Hash a plaintext secret with a fresh random salt.
pub fn hash_secret(secret: &str) -> Result<String, SecretError> {
    hash_secret_with_cost(secret, PBKDF2_ITERATIONS)
}

/// Hash with an explicit iteration count. The count is recorded in the
/// stored hash, so verification works regardless of the default. Useful for
/// fixtures; production paths go through [`hash_secret`].
pub fn hash_secret_with_cost(secret: &str, iterations: u32) -> Result<String, SecretError> {
    let salt_hex = crypto::generate_hex_secret(SALT_LEN)?;
    Ok(hash_with_salt(secret, &salt_hex, iterations.max(1)))
}

fn hash_with_salt(secret: &str, salt_hex: &str, iterations: u32) -> String {
    let salt = hex::decode(salt_hex).unwrap_or_default();
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, iterations, &mut out);
    format!("{SCHEME}${iterations}${salt_hex}${}", hex::encode(out))
}

/// Verify a plaintext secret against a stored hash.
///
/// Returns `false` on mismatch; `Err` only when the stored hash is not in a
/// format this module produces.
pub fn verify_secret(secret: &str, stored: &str) -> Result<bool, SecretError> {
    let mut parts = stored.split('$');
    let scheme = parts.next().ok_or(SecretError::BadFormat)?;
    let iterations: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(SecretError::BadFormat)?;
    let salt_hex = parts.next().ok_or(SecretError::BadFormat)?;
    let hash_hex = parts.next().ok_or(SecretError::BadFormat)?;
    if scheme != SCHEME || parts.next().is_some() {
        return Err(SecretError::BadFormat);
    }

    let recomputed = hash_with_salt(secret, salt_hex, iterations);
    let recomputed_hash = recomputed.rsplit('$').next().unwrap_or_default();
    Ok(crypto::timing_safe_eq(
        recomputed_hash.as_bytes(),
        hash_hex.as_bytes(),
    ))
}

//! Password digests.
//!
//! Stored hashes are the unsalted SHA-256 hex digest of the UTF-8 password,
//! matching rows written by earlier deployments. Swapping in a salted slow
//! hash only needs changes here plus a rehash-on-login path.

use sha2::{Digest, Sha256};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let candidate = hash_password(password);
    // Compare the whole digest regardless of where the first mismatch is.
    candidate.len() == password_hash.len()
        && candidate
            .bytes()
            .zip(password_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

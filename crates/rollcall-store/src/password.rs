//! Salted, iterated SHA-256 password hashing.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub(crate) const SALT_LEN: usize = 16;
const HASH_ROUNDS: u32 = 10_000;

pub(crate) fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub(crate) fn hash_password(salt: &[u8], password: &str) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::new().chain_update(salt).chain_update(password).finalize());
    for _ in 1..HASH_ROUNDS {
        let next = Sha256::new().chain_update(salt).chain_update(digest).finalize();
        digest.copy_from_slice(&next);
    }
    digest
}

/// Compare without short-circuiting on the first differing byte.
pub(crate) fn verify_password(salt: &[u8], password: &str, expected: &[u8]) -> bool {
    let actual = hash_password(salt, password);
    if actual.len() != expected.len() {
        return false;
    }
    actual
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

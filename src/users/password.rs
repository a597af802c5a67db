use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512;
use subtle::ConstantTimeEq;

pub const ITERATIONS: u32 = 10_000;
pub const KEY_LEN: usize = 512;
pub const SALT_LEN: usize = 16;

/// 16 random bytes, hex-encoded.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// PBKDF2-HMAC-SHA512 over the salt string's UTF-8 bytes, hex-encoded.
pub fn derive_hash(plain: &str, salt: &str) -> String {
    let mut key = vec![0u8; KEY_LEN];
    pbkdf2_hmac::<Sha512>(plain.as_bytes(), salt.as_bytes(), ITERATIONS, &mut key);
    hex::encode(key)
}

pub fn verify_password(plain: &str, salt: &str, hash: &str) -> bool {
    let candidate = derive_hash(plain, salt);
    candidate.as_bytes().ct_eq(hash.as_bytes()).into()
}

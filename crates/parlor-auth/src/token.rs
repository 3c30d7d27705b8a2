use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Bytes of OS randomness behind each magic-link token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Generate a URL-safe, unpadded magic-link token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest under which a token is stored and looked up. Lookups go through the
/// digest index, so a lookup for a forged token and one for a superseded token
/// take the same path.
pub fn digest_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

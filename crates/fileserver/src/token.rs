//! Token generation for temporary links

use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes behind each token (128 bits)
pub const TOKEN_BYTES: usize = 16;

/// Generate an unguessable, URL-safe token for a temporary link
///
/// The bytes come straight from the operating system's CSPRNG.
///
/// # Returns
/// * 32-character lowercase hexadecimal token
///
/// # Errors
/// Returns the RNG error if the entropy source cannot be read
pub fn generate_link_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Short, log-safe prefix of a token
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

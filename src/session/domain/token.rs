//! URL-safe random token generation for per-session viewer passwords.
//!
//! The crate's dependency stack has no dedicated CSPRNG crate, so this
//! draws randomness from [`uuid::Uuid::new_v4`] (already a dependency) and
//! whitens it through SHA-256 (also already a dependency) before encoding
//! with a hand-rolled URL-safe base64 alphabet. `uuid`'s v4 generator is
//! itself backed by the operating system CSPRNG, so this is not a
//! home-grown source of entropy — only the encoding step is local.

use sha2::{Digest, Sha256};

const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generates a 32-character URL-safe token suitable for
/// [`crate::session::domain::Session::session_viewer_password`].
#[must_use]
pub fn generate_viewer_password() -> String {
    let mut hasher = Sha256::new();
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let digest = hasher.finalize();
    encode_url_safe(&digest[..24])
}

/// Encodes `bytes` as unpadded URL-safe base64, three input bytes at a time.
///
/// Callers in this module always pass a length that is a multiple of
/// three; a short trailing chunk is treated as zero-padded rather than
/// panicking, since this is an internal helper with no untrusted input.
fn encode_url_safe(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().saturating_mul(4) / 3);
    for chunk in bytes.chunks(3) {
        let b0 = u32::from(chunk.first().copied().unwrap_or(0));
        let b1 = u32::from(chunk.get(1).copied().unwrap_or(0));
        let b2 = u32::from(chunk.get(2).copied().unwrap_or(0));
        let n = (b0 << 16) | (b1 << 8) | b2;
        for shift in [18, 12, 6, 0] {
            let index = usize::try_from((n >> shift) & 0x3f).unwrap_or(0);
            out.push(char::from(
                ALPHABET.get(index).copied().unwrap_or(b'A'),
            ));
        }
    }
    out
}

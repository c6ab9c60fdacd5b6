//! Room-code normalization and generation.
//!
//! Room codes are short, human-relayable strings ("read it over the phone").
//! The server normalizes on every operation so `abc123` and `ABC123` address
//! the same room.

use uuid::Uuid;

/// Characters used in generated codes. 0/O and 1/I are excluded because
/// codes get read aloud and retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated room code.
pub const CODE_LEN: usize = 6;

/// Normalize a user-supplied room code: trim surrounding whitespace and
/// uppercase it.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Mint a fresh room code from random bytes.
pub fn generate() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(CODE_LEN)
        .map(|b| CODE_ALPHABET[(*b as usize) % CODE_ALPHABET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_uppercases() {
        assert_eq!(normalize("  abc123 "), "ABC123");
        assert_eq!(normalize("ABC123"), "ABC123");
    }

    #[test]
    fn test_generated_codes_use_the_restricted_alphabet() {
        for _ in 0..32 {
            let code = generate();
            assert_eq!(code.len(), CODE_LEN);
            assert!(
                code.bytes().all(|b| CODE_ALPHABET.contains(&b)),
                "unexpected character in {code}"
            );
            // Already normalized by construction.
            assert_eq!(normalize(&code), code);
        }
    }
}

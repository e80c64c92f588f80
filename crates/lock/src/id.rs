//! Lease values and handle identifiers.
//!
//! Lease values must be unpredictable: a stale holder or an adversary that
//! can guess the value stored under a key could forge ownership and delete
//! another holder's lease. Values are therefore drawn from the operating
//! system's CSPRNG rather than from a seeded generator.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;

/// Upper bound on lease value length accepted anywhere in the crate.
pub const MAX_VALUE_LEN: usize = 256;

/// Number of random bytes in a lease value (hex-encoded to 32 characters).
const LEASE_VALUE_BYTES: usize = 16;

/// Number of random bytes in the suffix of a handle id (12 hex characters).
const HANDLE_ID_BYTES: usize = 6;

/// Generate a fresh lease value: 16 cryptographically random bytes,
/// hex-encoded.
pub fn new_lease_value() -> String {
    let mut buf = [0u8; LEASE_VALUE_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generate a locally unique handle identifier of the form
/// `"<milliseconds_since_epoch>-<12 hex chars>"`.
pub fn new_handle_id() -> String {
    let mut buf = [0u8; HANDLE_ID_BYTES];
    OsRng.fill_bytes(&mut buf);
    format!("{}-{}", Utc::now().timestamp_millis(), hex::encode(buf))
}

/// Constant-time equality over byte sequences.
///
/// Unequal lengths and inputs longer than [`MAX_VALUE_LEN`] are rejected up
/// front; the byte comparison itself does not short-circuit.
pub fn safe_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.len() > MAX_VALUE_LEN {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_value_is_32_hex_chars() {
        let value = new_lease_value();
        assert_eq!(value.len(), 32);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn lease_values_are_unique() {
        let a = new_lease_value();
        let b = new_lease_value();
        assert_ne!(a, b);
    }

    #[test]
    fn handle_id_has_timestamp_and_suffix() {
        let id = new_handle_id();
        let (millis, suffix) = id.split_once('-').expect("id should contain a dash");
        assert!(millis.parse::<i64>().expect("timestamp part") > 0);
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn safe_compare_equal_and_unequal() {
        assert!(safe_compare(b"abc123", b"abc123"));
        assert!(!safe_compare(b"abc123", b"abc124"));
    }

    #[test]
    fn safe_compare_rejects_length_mismatch() {
        assert!(!safe_compare(b"abc", b"abcd"));
    }

    #[test]
    fn safe_compare_rejects_oversized_input() {
        let long = vec![b'x'; MAX_VALUE_LEN + 1];
        assert!(!safe_compare(&long, &long));
    }
}

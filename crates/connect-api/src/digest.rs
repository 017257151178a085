//! sha256 integrity routine shared by every relay envelope.
//!
//! The digest is computed over the exact UTF-8 bytes of the serialized
//! body and rendered as lowercase hex. Receivers recompute it before
//! trusting a body.

use sha2::{Digest, Sha256};

use crate::error::Error;

/// Lowercase hex sha256 of `body`.
pub fn sha256_hex(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Verify that `expected` is the digest of `body`.
///
/// Hex case is ignored since some senders emit uppercase digests.
pub fn verify(body: &str, expected: &str) -> Result<(), Error> {
    let actual = sha256_hex(body);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            expected: expected.to_owned(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // sha256("abc")
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_accepts_uppercase() {
        let digest = sha256_hex("{\"query\":\"{ online }\"}").to_uppercase();
        assert!(verify("{\"query\":\"{ online }\"}", &digest).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let digest = sha256_hex("original");
        let err = verify("tampered", &digest).unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
    }

    #[test]
    fn whitespace_is_significant() {
        assert_ne!(sha256_hex("{\"a\":1}"), sha256_hex("{ \"a\": 1 }"));
    }
}

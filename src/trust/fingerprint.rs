//! Pinning certificates by their SHA-256 fingerprint.

use std::{fmt, str::FromStr};

use crate::commons::error::Error;

const FINGERPRINT_LEN: usize = 32;

//------------ Fingerprint ---------------------------------------------------

/// The SHA-256 digest of a DER encoded certificate.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Computes the fingerprint of a DER encoded certificate.
    pub fn of_der(der: &[u8]) -> Self {
        Fingerprint(openssl::sha::sha256(der))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compares in constant time.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        openssl::memcmp::eq(&self.0, &other.0)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    /// Parses a hex fingerprint, ignoring case and `:` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.trim().chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(normalized.to_ascii_lowercase())
            .map_err(|e| Error::fingerprint_mismatch(format!("'{}' is not a hex fingerprint: {}", s, e)))?;

        let bytes: [u8; FINGERPRINT_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::fingerprint_mismatch(format!(
                "'{}' is not a SHA-256 fingerprint: expected {} bytes, got {}",
                s,
                FINGERPRINT_LEN,
                bytes.len()
            ))
        })?;
        Ok(Fingerprint(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

//------------ verify --------------------------------------------------------

/// Checks that the DER encoded certificate has the expected fingerprint.
///
/// Only a full, case-insensitive match of the SHA-256 digest passes. There
/// is no prefix matching and no way to continue on a mismatch.
pub fn verify(cert_der: &[u8], expected: &str) -> Result<Fingerprint, Error> {
    let expected = Fingerprint::from_str(expected)?;
    verify_fingerprint(cert_der, &expected)
}

/// Like [`verify`], for an already parsed fingerprint.
pub fn verify_fingerprint(cert_der: &[u8], expected: &Fingerprint) -> Result<Fingerprint, Error> {
    let actual = Fingerprint::of_der(cert_der);
    if actual.matches(expected) {
        Ok(actual)
    } else {
        Err(Error::fingerprint_mismatch(format!(
            "certificate has fingerprint {}, expected {}",
            actual, expected
        )))
    }
}

//------------ Tests ---------------------------------------------------------

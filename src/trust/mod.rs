//! Establishing trust in a CA.
//!
//! A CA's root certificate is downloaded once and pinned by its SHA-256
//! fingerprint. After that, the pinned file is the trust anchor for every
//! connection to the CA.

pub mod fingerprint;
mod root;

pub use self::fingerprint::Fingerprint;
pub use self::root::{RootCertificate, TrustAnchor, bootstrap};

//! Certificates issued by the CA, and identities built from them.

use std::{fmt, path::Path};

use chrono::{DateTime, Utc};
use log::info;
use openssl::{
    pkey::{HasPublic, PKey, PKeyRef, Private},
    x509::X509,
};
use secrecy::{ExposeSecret, SecretString, SecretVec};

use crate::{
    commons::{crypto, error::Error, util::file},
    trust::TrustAnchor,
};

//------------ IssuedCertificate ---------------------------------------------

/// A leaf certificate with the chain back to the trust anchor, and the
/// private key if it was generated here.
pub struct IssuedCertificate {
    leaf: X509,
    intermediates: Vec<X509>,
    key: Option<PKey<Private>>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl IssuedCertificate {
    /// Accepts a chain returned by the CA.
    ///
    /// The chain must verify against the anchor and the leaf must carry
    /// `expected_key`. The CA is not trusted to get either right, so both
    /// failures are reported as `ServerSigningError`.
    pub fn verify_chain<T: HasPublic>(
        chain: Vec<X509>,
        anchor: &TrustAnchor,
        expected_key: &PKeyRef<T>,
    ) -> Result<Self, Error> {
        let mut chain = chain.into_iter();
        let leaf = chain
            .next()
            .ok_or_else(|| Error::server_signing("CA returned an empty certificate chain"))?;
        let intermediates: Vec<X509> = chain.collect();

        crypto::verify_chain(anchor.cert(), &leaf, &intermediates).map_err(|reason| {
            Error::server_signing(format!("issued chain does not verify against the root: {}", reason))
        })?;

        let leaf_key = leaf
            .public_key()
            .map_err(|e| Error::server_signing(format!("issued certificate has no usable key: {}", e)))?;
        if !leaf_key.public_eq(expected_key) {
            return Err(Error::server_signing("issued certificate does not carry the requested key"));
        }

        let not_before = crypto::asn1_to_datetime(leaf.not_before())
            .map_err(|e| Error::server_signing(format!("invalid notBefore: {}", e)))?;
        let not_after = crypto::asn1_to_datetime(leaf.not_after())
            .map_err(|e| Error::server_signing(format!("invalid notAfter: {}", e)))?;

        Ok(IssuedCertificate {
            leaf,
            intermediates,
            key: None,
            not_before,
            not_after,
        })
    }

    pub fn with_key(mut self, key: PKey<Private>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn leaf(&self) -> &X509 {
        &self.leaf
    }

    pub fn intermediates(&self) -> &[X509] {
        &self.intermediates
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn subject(&self) -> String {
        crypto::display_name(self.leaf.subject_name())
    }

    pub fn serial(&self) -> String {
        self.leaf
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|hex| hex.to_string()))
            .unwrap_or_default()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// The leaf followed by the intermediates, as PEM.
    pub fn chain_pem(&self) -> Result<Vec<u8>, Error> {
        let mut pem = Vec::new();
        for cert in std::iter::once(&self.leaf).chain(self.intermediates.iter()) {
            let encoded = cert
                .to_pem()
                .map_err(|e| Error::malformed_certificate(format!("cannot encode certificate: {}", e)))?;
            pem.extend_from_slice(&encoded);
        }
        Ok(pem)
    }

    /// The private key as unencrypted PKCS#8 PEM, if there is one.
    pub fn key_pem(&self) -> Result<Option<SecretVec<u8>>, Error> {
        match &self.key {
            None => Ok(None),
            Some(key) => key
                .private_key_to_pem_pkcs8()
                .map(|pem| Some(SecretVec::new(pem)))
                .map_err(|e| Error::signing_failed(format!("cannot encode private key: {}", e))),
        }
    }

    /// Writes the chain and, if present and a path is given, the key.
    ///
    /// Both files are written atomically. The key file is only readable by
    /// its owner.
    pub fn save(&self, crt_path: &Path, key_path: Option<&Path>, force: bool) -> Result<(), Error> {
        if let (Some(key_path), Some(key_pem)) = (key_path, self.key_pem()?) {
            file::save_atomic(key_pem.expose_secret(), key_path, force, true)?;
            info!("Saved private key to '{}'", key_path.display());
        }
        file::save_atomic(&self.chain_pem()?, crt_path, force, false)?;
        info!("Saved certificate for '{}' to '{}'", self.subject(), crt_path.display());
        Ok(())
    }
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("subject", &self.subject())
            .field("serial", &self.serial())
            .field("not_after", &self.not_after)
            .field("intermediates", &self.intermediates.len())
            .field("has_key", &self.has_key())
            .finish()
    }
}

//------------ ClientIdentity ------------------------------------------------

/// An existing certificate and its private key, used to authenticate to
/// the CA for renewal.
pub struct ClientIdentity {
    chain: Vec<X509>,
    key: PKey<Private>,
    not_after: DateTime<Utc>,
}

impl ClientIdentity {
    /// Builds an identity, checking that the key belongs to the leaf.
    pub fn new(chain: Vec<X509>, key: PKey<Private>) -> Result<Self, Error> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::malformed_certificate("no certificate found"))?;
        let leaf_key = leaf
            .public_key()
            .map_err(|e| Error::malformed_certificate(format!("certificate has no usable key: {}", e)))?;
        if !leaf_key.public_eq(&key) {
            return Err(Error::invalid_request("private key does not belong to the certificate"));
        }
        let not_after = crypto::asn1_to_datetime(leaf.not_after())
            .map_err(|e| Error::malformed_certificate(format!("invalid notAfter: {}", e)))?;

        Ok(ClientIdentity { chain, key, not_after })
    }

    /// Loads the certificate (chain) and the key, which may be encrypted.
    pub fn load(crt_path: &Path, key_path: &Path, passphrase: Option<&SecretString>) -> Result<Self, Error> {
        let crt = file::read(crt_path).map_err(|e| not_found_or_io(e, "certificate", crt_path))?;
        let chain = crypto::parse_certificate_chain(&crt)?;

        let key_pem = file::read_secret(key_path).map_err(|e| not_found_or_io(e, "private key", key_path))?;
        let key = crypto::decrypt_private_key(key_pem.expose_secret(), passphrase)?;

        Self::new(chain, key)
    }

    pub fn leaf(&self) -> &X509 {
        &self.chain[0]
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn subject(&self) -> String {
        crypto::display_name(self.leaf().subject_name())
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Converts the identity for use by the HTTP client.
    pub fn to_reqwest(&self) -> Result<reqwest::Identity, Error> {
        let mut chain = Vec::new();
        for cert in &self.chain {
            let pem = cert
                .to_pem()
                .map_err(|e| Error::malformed_certificate(format!("cannot encode certificate: {}", e)))?;
            chain.extend_from_slice(&pem);
        }
        let key = self
            .key
            .private_key_to_pem_pkcs8()
            .map(SecretVec::new)
            .map_err(|e| Error::key_decryption_failed(format!("cannot encode private key: {}", e)))?;

        reqwest::Identity::from_pkcs8_pem(&chain, key.expose_secret())
            .map_err(|e| Error::connection(format!("cannot use client identity: {}", e)))
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("subject", &self.subject())
            .field("not_after", &self.not_after)
            .finish()
    }
}

fn not_found_or_io(e: crate::commons::error::IoError, what: &str, path: &Path) -> Error {
    if e.is_not_found() {
        Error::not_found(format!("no {} at '{}'", what, path.display()))
    } else {
        Error::Io(e)
    }
}

//------------ Tests ---------------------------------------------------------

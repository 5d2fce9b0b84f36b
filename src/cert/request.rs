//! Certificate signing requests.

use std::{fmt, net::IpAddr, path::Path, str::FromStr};

use bytes::Bytes;
use log::debug;
use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, PKeyRef, Private, Public},
    rsa::Rsa,
    stack::Stack,
    x509::{X509NameBuilder, X509Req, X509ReqBuilder, extension::SubjectAlternativeName},
};
use serde::{Deserialize, Serialize};

use crate::commons::{crypto, error::Error, util::file};

//------------ KeyType -------------------------------------------------------

/// The kind of key to generate for a new certificate.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyType {
    #[default]
    EcP256,
    EcP384,
    Rsa2048,
    Rsa3072,
    Rsa4096,
    Ed25519,
}

impl KeyType {
    pub const ALL: [KeyType; 6] = [
        KeyType::EcP256,
        KeyType::EcP384,
        KeyType::Rsa2048,
        KeyType::Rsa3072,
        KeyType::Rsa4096,
        KeyType::Ed25519,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::EcP256 => "ec-p256",
            KeyType::EcP384 => "ec-p384",
            KeyType::Rsa2048 => "rsa-2048",
            KeyType::Rsa3072 => "rsa-3072",
            KeyType::Rsa4096 => "rsa-4096",
            KeyType::Ed25519 => "ed25519",
        }
    }

    /// Generates a fresh private key of this type.
    pub fn generate(self) -> Result<PKey<Private>, ErrorStack> {
        match self {
            KeyType::EcP256 => ec_key(Nid::X9_62_PRIME256V1),
            KeyType::EcP384 => ec_key(Nid::SECP384R1),
            KeyType::Rsa2048 => PKey::from_rsa(Rsa::generate(2048)?),
            KeyType::Rsa3072 => PKey::from_rsa(Rsa::generate(3072)?),
            KeyType::Rsa4096 => PKey::from_rsa(Rsa::generate(4096)?),
            KeyType::Ed25519 => PKey::generate_ed25519(),
        }
    }
}

fn ec_key(curve: Nid) -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(curve)?;
    PKey::from_ec_key(EcKey::generate(&group)?)
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyType::ALL
            .iter()
            .copied()
            .find(|kt| kt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<_> = KeyType::ALL.iter().map(|kt| kt.as_str()).collect();
                format!("unknown key type '{}', use one of: {}", s, known.join(", "))
            })
    }
}

impl TryFrom<String> for KeyType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        KeyType::from_str(&s)
    }
}

impl From<KeyType> for String {
    fn from(kt: KeyType) -> Self {
        kt.as_str().to_string()
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------ San -----------------------------------------------------------

/// A subject alternative name, classified by what it looks like.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum San {
    Ip(IpAddr),
    Email(String),
    Uri(String),
    Dns(String),
}

impl San {
    pub fn classify(s: &str) -> Self {
        if let Ok(ip) = IpAddr::from_str(s) {
            San::Ip(ip)
        } else if s.contains("://") {
            San::Uri(s.to_string())
        } else if s.contains('@') {
            San::Email(s.to_string())
        } else {
            San::Dns(s.to_string())
        }
    }
}

impl fmt::Display for San {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            San::Ip(ip) => write!(f, "IP:{}", ip),
            San::Email(email) => write!(f, "email:{}", email),
            San::Uri(uri) => write!(f, "URI:{}", uri),
            San::Dns(name) => write!(f, "DNS:{}", name),
        }
    }
}

//------------ CertificateRequest --------------------------------------------

/// Parameters for a new certificate with a freshly generated key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateRequest {
    subject: String,
    sans: Vec<String>,
    key_type: KeyType,
}

impl CertificateRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        CertificateRequest {
            subject: subject.into(),
            sans: vec![],
            key_type: KeyType::default(),
        }
    }

    pub fn with_sans(mut self, sans: Vec<String>) -> Self {
        self.sans = sans;
        self
    }

    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The SANs to request. The subject itself when none were given.
    pub fn sans(&self) -> Vec<String> {
        if self.sans.is_empty() {
            vec![self.subject.clone()]
        } else {
            self.sans.clone()
        }
    }

    /// Generates a key and a CSR for it.
    pub fn build(&self) -> Result<(Csr, PKey<Private>), Error> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(Error::invalid_request("subject must not be empty"));
        }

        let key = self
            .key_type
            .generate()
            .map_err(|e| Error::invalid_request(format!("cannot generate {} key: {}", self.key_type, e)))?;

        let sans: Vec<San> = self.sans().iter().map(|s| San::classify(s)).collect();
        let req = build_req(subject, &sans, &key)
            .map_err(|e| Error::invalid_request(format!("cannot create CSR for '{}': {}", subject, e)))?;

        debug!(
            "Created CSR for '{}' with {} key and SANs [{}]",
            subject,
            self.key_type,
            sans.iter().map(|san| san.to_string()).collect::<Vec<_>>().join(", ")
        );
        Ok((Csr::from_req(req)?, key))
    }
}

fn build_req(subject: &str, sans: &[San], key: &PKeyRef<Private>) -> Result<X509Req, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, subject)?;
    let name = name.build();

    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key)?;

    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            match entry {
                San::Ip(ip) => san.ip(&ip.to_string()),
                San::Email(email) => san.email(email),
                San::Uri(uri) => san.uri(uri),
                San::Dns(dns) => san.dns(dns),
            };
        }
        let extension = san.build(&builder.x509v3_context(None))?;
        let mut extensions = Stack::new()?;
        extensions.push(extension)?;
        builder.add_extensions(&extensions)?;
    }

    builder.sign(key, signing_digest(key))?;
    Ok(builder.build())
}

fn signing_digest<T>(key: &PKeyRef<T>) -> MessageDigest {
    match key.id() {
        Id::ED25519 | Id::ED448 => MessageDigest::null(),
        _ => MessageDigest::sha256(),
    }
}

//------------ Csr -----------------------------------------------------------

/// A certificate signing request, ready to be sent to the CA.
pub struct Csr {
    req: X509Req,
    der: Bytes,
}

impl Csr {
    fn from_req(req: X509Req) -> Result<Self, Error> {
        let der = req
            .to_der()
            .map(Bytes::from)
            .map_err(|e| Error::invalid_request(format!("cannot encode CSR: {}", e)))?;
        Ok(Csr { req, der })
    }

    /// Parses a PEM or DER encoded CSR and checks its self-signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let req = if crypto::is_pem(bytes) {
            X509Req::from_pem(bytes)
        } else {
            X509Req::from_der(bytes)
        }
        .map_err(|e| Error::invalid_request(format!("cannot parse CSR: {}", e)))?;

        let key = req
            .public_key()
            .map_err(|e| Error::invalid_request(format!("CSR has no usable public key: {}", e)))?;
        if !req.verify(&key).unwrap_or(false) {
            return Err(Error::invalid_request("CSR signature does not verify"));
        }
        Self::from_req(req)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = file::read(path).map_err(|e| {
            if e.is_not_found() {
                Error::not_found(format!("no CSR at '{}'", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn der(&self) -> &Bytes {
        &self.der
    }

    pub fn subject(&self) -> String {
        crypto::display_name(self.req.subject_name())
    }

    pub fn public_key(&self) -> Result<PKey<Public>, Error> {
        self.req
            .public_key()
            .map_err(|e| Error::invalid_request(format!("CSR has no usable public key: {}", e)))
    }

    pub fn to_pem(&self) -> Result<Vec<u8>, Error> {
        self.req
            .to_pem()
            .map_err(|e| Error::invalid_request(format!("cannot encode CSR: {}", e)))
    }
}

impl fmt::Debug for Csr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Csr").field("subject", &self.subject()).finish()
    }
}

//------------ Tests ---------------------------------------------------------

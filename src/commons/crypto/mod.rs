//! X.509 helpers on top of openssl.

use chrono::{DateTime, TimeZone, Utc};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    error::ErrorStack,
    nid::Nid,
    pkey::{PKey, Private},
    stack::Stack,
    x509::{
        X509, X509NameRef, X509Ref,
        store::X509StoreBuilder,
        X509StoreContext,
    },
};

use secrecy::{ExposeSecret, SecretString};

use crate::commons::error::Error;

const PEM_START: &[u8] = b"-----BEGIN";

/// Returns whether the bytes look like PEM rather than DER.
pub fn is_pem(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &bytes[start..])
        .unwrap_or_default();
    trimmed.starts_with(PEM_START)
}

/// Parses a single certificate, PEM or DER encoded.
pub fn parse_certificate(bytes: &[u8]) -> Result<X509, Error> {
    let res = if is_pem(bytes) {
        X509::from_pem(bytes)
    } else {
        X509::from_der(bytes)
    };
    res.map_err(|e| Error::malformed_certificate(format!("cannot parse X.509 certificate: {}", e)))
}

/// Parses one or more certificates, leaf first.
///
/// PEM input may hold a bundle. DER input is always a single certificate.
pub fn parse_certificate_chain(bytes: &[u8]) -> Result<Vec<X509>, Error> {
    if is_pem(bytes) {
        let chain = X509::stack_from_pem(bytes)
            .map_err(|e| Error::malformed_certificate(format!("cannot parse PEM certificates: {}", e)))?;
        if chain.is_empty() {
            Err(Error::malformed_certificate("no certificate found"))
        } else {
            Ok(chain)
        }
    } else {
        parse_certificate(bytes).map(|cert| vec![cert])
    }
}

/// Returns whether a PEM private key is encrypted, either as PKCS#8 or in
/// the legacy OpenSSL format.
pub fn is_encrypted_pem(pem: &[u8]) -> bool {
    const MARKERS: [&[u8]; 2] = [b"BEGIN ENCRYPTED PRIVATE KEY", b"Proc-Type: 4,ENCRYPTED"];
    MARKERS
        .iter()
        .any(|marker| pem.windows(marker.len()).any(|window| window == *marker))
}

/// Parses a PEM private key, decrypting it with the passphrase if needed.
///
/// An encrypted key without a passphrase is refused up front, so openssl
/// never falls back to prompting on a terminal.
pub fn decrypt_private_key(pem: &[u8], passphrase: Option<&SecretString>) -> Result<PKey<Private>, Error> {
    if is_encrypted_pem(pem) {
        let passphrase = passphrase
            .ok_or_else(|| Error::key_decryption_failed("the key is encrypted but no passphrase was given"))?;
        PKey::private_key_from_pem_passphrase(pem, passphrase.expose_secret().as_bytes())
            .map_err(|_| Error::key_decryption_failed("wrong passphrase or corrupt key"))
    } else {
        PKey::private_key_from_pem(pem)
            .map_err(|e| Error::key_decryption_failed(format!("cannot parse private key: {}", e)))
    }
}

/// Converts an ASN.1 time to a UTC date time.
pub fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>, String> {
    let epoch = Asn1Time::from_unix(0).map_err(|e| e.to_string())?;
    let diff = epoch.diff(time).map_err(|e| e.to_string())?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| format!("time {} is out of range", time))
}

/// Returns the common name of an X.509 name, or the full name if there is
/// no common name.
pub fn display_name(name: &X509NameRef) -> String {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name().unwrap_or("?");
        let value = String::from_utf8_lossy(entry.data().as_slice()).into_owned();
        if entry.object().nid() == Nid::COMMONNAME {
            return value;
        }
        parts.push(format!("{}={}", key, value));
    }
    parts.join(", ")
}

/// Verifies that `leaf` chains up to `anchor`, using `intermediates` as
/// untrusted helpers.
///
/// Returns the openssl verification error as a string on failure.
pub fn verify_chain(anchor: &X509Ref, leaf: &X509Ref, intermediates: &[X509]) -> Result<(), String> {
    let outcome = || -> Result<Option<String>, ErrorStack> {
        let mut store = X509StoreBuilder::new()?;
        store.add_cert(anchor.to_owned())?;
        let store = store.build();

        let mut chain = Stack::new()?;
        for cert in intermediates {
            chain.push(cert.clone())?;
        }

        let mut context = X509StoreContext::new()?;
        context.init(&store, leaf, &chain, |ctx| {
            if ctx.verify_cert()? {
                Ok(None)
            } else {
                Ok(Some(ctx.error().error_string().to_string()))
            }
        })
    };

    match outcome() {
        Ok(None) => Ok(()),
        Ok(Some(reason)) => Err(reason),
        Err(e) => Err(e.to_string()),
    }
}

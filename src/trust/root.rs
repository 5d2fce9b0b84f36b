//! The pinned root certificate of a CA.

use std::{fmt, path::Path, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info};
use openssl::x509::X509;
use url::Url;

use crate::{
    client::CaTransport,
    commons::{
        crypto,
        error::Error,
        util::file,
    },
    trust::fingerprint::{self, Fingerprint},
};

//------------ RootCertificate -----------------------------------------------

/// A certificate that was accepted as trust anchor.
///
/// Values of this type only come out of [`bootstrap`], after the
/// fingerprint was verified, or from [`RootCertificate::load`], reading a
/// file that was pinned earlier.
#[derive(Clone)]
pub struct RootCertificate {
    cert: X509,
    der: Bytes,
    fingerprint: Fingerprint,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl RootCertificate {
    fn from_cert(cert: X509) -> Result<Self, Error> {
        let der = cert
            .to_der()
            .map(Bytes::from)
            .map_err(|e| Error::malformed_certificate(format!("cannot encode certificate: {}", e)))?;
        let not_before = crypto::asn1_to_datetime(cert.not_before())
            .map_err(|e| Error::malformed_certificate(format!("invalid notBefore: {}", e)))?;
        let not_after = crypto::asn1_to_datetime(cert.not_after())
            .map_err(|e| Error::malformed_certificate(format!("invalid notAfter: {}", e)))?;
        let fingerprint = Fingerprint::of_der(&der);

        Ok(RootCertificate {
            cert,
            der,
            fingerprint,
            not_before,
            not_after,
        })
    }

    /// Loads a root certificate that was pinned before.
    ///
    /// The file itself is the trust anchor, so its fingerprint is not
    /// checked again.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = file::read(path).map_err(|e| {
            if e.is_not_found() {
                Error::not_found(format!("no root certificate at '{}'", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        let cert = crypto::parse_certificate(&bytes)?;
        Self::from_cert(cert)
    }

    /// Saves the certificate as PEM, atomically.
    pub fn save(&self, path: &Path, force: bool) -> Result<(), Error> {
        let pem = self.to_pem()?;
        file::save_atomic(&pem, path, force, false)?;
        info!("Saved root certificate {} to '{}'", self.fingerprint, path.display());
        Ok(())
    }

    pub fn cert(&self) -> &X509 {
        &self.cert
    }

    pub fn der(&self) -> &Bytes {
        &self.der
    }

    pub fn to_pem(&self) -> Result<Vec<u8>, Error> {
        self.cert
            .to_pem()
            .map_err(|e| Error::malformed_certificate(format!("cannot encode certificate: {}", e)))
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn subject(&self) -> String {
        crypto::display_name(self.cert.subject_name())
    }

    pub fn issuer(&self) -> String {
        crypto::display_name(self.cert.issuer_name())
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

impl fmt::Debug for RootCertificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RootCertificate")
            .field("subject", &self.subject())
            .field("fingerprint", &self.fingerprint)
            .field("not_after", &self.not_after)
            .finish()
    }
}

//------------ TrustAnchor ---------------------------------------------------

/// The read-only trust anchor handed to every issuance and renewal call.
///
/// Cheap to clone. It is loaded once by whoever drives the operations and
/// passed down explicitly.
#[derive(Clone, Debug)]
pub struct TrustAnchor(Arc<RootCertificate>);

impl TrustAnchor {
    pub fn load(path: &Path) -> Result<Self, Error> {
        RootCertificate::load(path).map(Self::from)
    }

    pub fn root(&self) -> &RootCertificate {
        &self.0
    }

    pub fn cert(&self) -> &X509 {
        self.0.cert()
    }

    /// Returns the anchor for use by the HTTP client.
    pub fn to_reqwest(&self) -> Result<reqwest::Certificate, reqwest::Error> {
        reqwest::Certificate::from_der(self.0.der())
    }
}

impl From<RootCertificate> for TrustAnchor {
    fn from(root: RootCertificate) -> Self {
        TrustAnchor(Arc::new(root))
    }
}

//------------ bootstrap -----------------------------------------------------

/// Downloads the root certificate of the CA at `ca_url` and pins it.
///
/// The downloaded bytes are only accepted if their SHA-256 fingerprint
/// equals `expected`. Nothing is persisted here, callers save the returned
/// certificate themselves.
pub async fn bootstrap<T: CaTransport>(
    transport: &T,
    ca_url: &Url,
    expected: &str,
) -> Result<RootCertificate, Error> {
    let expected: Fingerprint = expected.parse()?;

    debug!("Fetching root certificate {} from {}", expected, ca_url);
    let bytes = transport.fetch_root(ca_url, &expected).await.map_err(Error::connection)?;

    let cert = crypto::parse_certificate(&bytes)?;
    let root = RootCertificate::from_cert(cert)?;
    fingerprint::verify_fingerprint(root.der(), &expected)?;

    info!("Verified root certificate '{}' with fingerprint {}", root.subject(), root.fingerprint());
    Ok(root)
}

//------------ Tests ---------------------------------------------------------

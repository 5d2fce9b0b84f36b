//! Getting a new certificate with a one-time token.

use log::{debug, info};
use url::Url;

use crate::{
    cert::{CertificateRequest, Csr, IssuedCertificate},
    client::{CaTransport, SignRequest},
    commons::error::Error,
    trust::TrustAnchor,
};

/// Generates a key and CSR for `request` and has the CA sign it.
///
/// The returned certificate carries the new private key.
pub async fn sign<T: CaTransport>(
    transport: &T,
    ca_url: &Url,
    anchor: &TrustAnchor,
    token: &str,
    request: &CertificateRequest,
) -> Result<IssuedCertificate, Error> {
    let (csr, key) = request.build()?;
    let issued = sign_csr(transport, ca_url, anchor, token, &csr).await?;
    Ok(issued.with_key(key))
}

/// Has the CA sign an existing CSR.
///
/// The returned chain is verified against `anchor` and must certify the
/// CSR's key, whatever the connection already established.
pub async fn sign_csr<T: CaTransport>(
    transport: &T,
    ca_url: &Url,
    anchor: &TrustAnchor,
    token: &str,
    csr: &Csr,
) -> Result<IssuedCertificate, Error> {
    let public_key = csr.public_key()?;
    let request = SignRequest::new(token, csr);

    debug!("Requesting certificate for '{}' from {}", csr.subject(), ca_url);
    let response = transport
        .sign(ca_url, anchor, &request)
        .await
        .map_err(Error::from_http)?;

    let chain = response.decode_chain().map_err(Error::server_signing)?;
    let issued = IssuedCertificate::verify_chain(chain, anchor, &public_key)?;

    info!(
        "Received certificate for '{}', serial {}, valid until {}",
        issued.subject(),
        issued.serial(),
        issued.not_after().to_rfc3339()
    );
    Ok(issued)
}

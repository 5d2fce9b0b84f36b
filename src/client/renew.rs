//! Renewing a certificate with the certificate itself.

use chrono::{DateTime, Utc};
use log::{debug, info};
use url::Url;

use crate::{
    cert::{ClientIdentity, IssuedCertificate},
    client::CaTransport,
    commons::error::Error,
    trust::TrustAnchor,
};

/// Renews the certificate of `identity` over mutual TLS.
///
/// A certificate that expired before `now` cannot authenticate anything, so
/// that fails before the CA is contacted. The renewed certificate must
/// verify against `anchor`, carry the same public key and expire later than
/// the current one. The result holds no private key since the existing one
/// stays in use.
pub async fn renew<T: CaTransport>(
    transport: &T,
    ca_url: &Url,
    anchor: &TrustAnchor,
    identity: &ClientIdentity,
    now: DateTime<Utc>,
) -> Result<IssuedCertificate, Error> {
    if identity.not_after() < now {
        return Err(Error::certificate_expired(format!(
            "certificate for '{}' expired at {}",
            identity.subject(),
            identity.not_after().to_rfc3339()
        )));
    }

    debug!("Renewing certificate for '{}' at {}", identity.subject(), ca_url);
    let response = transport
        .renew(ca_url, anchor, identity)
        .await
        .map_err(Error::from_http)?;

    let chain = response.decode_chain().map_err(Error::server_signing)?;
    let renewed = IssuedCertificate::verify_chain(chain, anchor, identity.key())?;
    if renewed.not_after() <= identity.not_after() {
        return Err(Error::server_signing(format!(
            "renewed certificate expires at {}, not after the current one at {}",
            renewed.not_after().to_rfc3339(),
            identity.not_after().to_rfc3339()
        )));
    }

    info!(
        "Renewed certificate for '{}', serial {}, valid until {}",
        renewed.subject(),
        renewed.serial(),
        renewed.not_after().to_rfc3339()
    );
    Ok(renewed)
}

//! Talking to the CA.
//!
//! The [`CaTransport`] trait is the seam between the protocol logic in
//! [`trust`](crate::trust), [`issue`] and [`renew`] and the network. The
//! real thing is [`HttpTransport`].

use std::{future::Future, time::Duration};

use bytes::Bytes;
use log::debug;
use url::Url;

use crate::{
    cert::ClientIdentity,
    commons::util::httpclient,
    constants::{CA_PATH_RENEW, CA_PATH_ROOT, CA_PATH_SIGN, DFLT_HTTP_TIMEOUT_SECS},
    trust::{Fingerprint, TrustAnchor},
};

pub mod api;
pub mod issue;
pub mod renew;

pub use self::{
    api::{ErrorResponse, SignRequest, SignResponse},
    issue::{sign, sign_csr},
    renew::renew,
};

//------------ CaTransport ---------------------------------------------------

/// The requests a client makes to a CA.
pub trait CaTransport {
    /// Fetches the root certificate with the given fingerprint.
    ///
    /// No trust anchor exists yet, so implementations must not rely on the
    /// connection for anything. The caller checks the fingerprint.
    fn fetch_root(
        &self,
        ca_url: &Url,
        fingerprint: &Fingerprint,
    ) -> impl Future<Output = Result<Bytes, httpclient::Error>> + Send;

    /// Asks the CA to sign a CSR, over a connection anchored to `anchor`.
    fn sign(
        &self,
        ca_url: &Url,
        anchor: &TrustAnchor,
        request: &SignRequest,
    ) -> impl Future<Output = Result<SignResponse, httpclient::Error>> + Send;

    /// Asks the CA to renew the certificate of `identity`, presenting it as
    /// the TLS client certificate.
    fn renew(
        &self,
        ca_url: &Url,
        anchor: &TrustAnchor,
        identity: &ClientIdentity,
    ) -> impl Future<Output = Result<SignResponse, httpclient::Error>> + Send;
}

//------------ HttpTransport -------------------------------------------------

/// Talks to a CA over HTTPS.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        HttpTransport { timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new(Duration::from_secs(DFLT_HTTP_TIMEOUT_SECS))
    }
}

impl CaTransport for HttpTransport {
    async fn fetch_root(&self, ca_url: &Url, fingerprint: &Fingerprint) -> Result<Bytes, httpclient::Error> {
        let uri = endpoint(ca_url, &format!("{}/{}", CA_PATH_ROOT, fingerprint));
        debug!("GET {}", uri);
        let client = httpclient::bootstrap_client(&uri, self.timeout)?;
        httpclient::get_bytes(&client, &uri).await
    }

    async fn sign(
        &self,
        ca_url: &Url,
        anchor: &TrustAnchor,
        request: &SignRequest,
    ) -> Result<SignResponse, httpclient::Error> {
        let uri = endpoint(ca_url, CA_PATH_SIGN);
        let anchor = anchor
            .to_reqwest()
            .map_err(|e| httpclient::Error::request_build_https_cert(&anchor.root().subject(), e))?;
        let client = httpclient::anchored_client(&uri, anchor, None, self.timeout)?;
        httpclient::post_json_with_response(&client, &uri, request).await
    }

    async fn renew(
        &self,
        ca_url: &Url,
        anchor: &TrustAnchor,
        identity: &ClientIdentity,
    ) -> Result<SignResponse, httpclient::Error> {
        let uri = endpoint(ca_url, CA_PATH_RENEW);
        let anchor = anchor
            .to_reqwest()
            .map_err(|e| httpclient::Error::request_build_https_cert(&anchor.root().subject(), e))?;
        let identity = identity
            .to_reqwest()
            .map_err(|e| httpclient::Error::request_build(&uri, e))?;
        let client = httpclient::anchored_client(&uri, anchor, Some(identity), self.timeout)?;
        httpclient::post_empty_with_response(&client, &uri).await
    }
}

/// Returns the URI of an endpoint below the CA URL.
pub fn endpoint(ca_url: &Url, path: &str) -> String {
    format!("{}/{}", ca_url.as_str().trim_end_matches('/'), path)
}

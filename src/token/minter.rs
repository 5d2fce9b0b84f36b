//! Minting one-time tokens.

use chrono::{DateTime, SubsecRound, Utc};
use jsonwebtoken::Header;
use log::{debug, info};
use secrecy::SecretString;
use uuid::Uuid;

use crate::{
    commons::error::Error,
    token::{
        claims::{AuthToken, Claims},
        provisioner::{ProvisionerRef, SigningKey},
        time::{TimeSpec, TokenLifetime, TokenWindow},
        validator,
    },
};

//------------ TokenRequest --------------------------------------------------

/// What a token should authorise.
#[derive(Clone, Debug, Default)]
pub struct TokenRequest {
    subject: String,
    sans: Vec<String>,
    audience: Option<String>,
    not_before: Option<TimeSpec>,
    not_after: Option<TimeSpec>,
}

impl TokenRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        TokenRequest {
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_sans(mut self, sans: Vec<String>) -> Self {
        self.sans = sans;
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_not_before(mut self, not_before: TimeSpec) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn with_not_after(mut self, not_after: TimeSpec) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

//------------ mint ----------------------------------------------------------

/// Mints a token for the request, signed by the provisioner's key.
///
/// Relative times in the request are resolved against `now`. The key is
/// decrypted with `passphrase` if needed and the decrypted material is
/// dropped before this returns, whatever the outcome. Every token is
/// validated against the key before it is handed out.
pub fn mint(
    request: &TokenRequest,
    provisioner: &ProvisionerRef,
    key: &SigningKey,
    passphrase: Option<&SecretString>,
    now: DateTime<Utc>,
    lifetime: &TokenLifetime,
) -> Result<AuthToken, Error> {
    if request.subject.trim().is_empty() {
        return Err(Error::invalid_request("token subject must not be empty"));
    }

    let window = TokenWindow::resolve(request.not_before.as_ref(), request.not_after.as_ref(), now, lifetime)?;
    if let Some((key_not_before, key_not_after)) = key.validity() {
        if !window.fits_within(key_not_before, key_not_after) {
            return Err(Error::invalid_time_window(format!(
                "token window {} - {} exceeds the signing key validity {} - {}",
                window.not_before().to_rfc3339(),
                window.not_after().to_rfc3339(),
                key_not_before.to_rfc3339(),
                key_not_after.to_rfc3339()
            )));
        }
    }

    let claims = Claims {
        sub: request.subject.clone(),
        iss: provisioner.issuer().to_string(),
        aud: request.audience.clone(),
        nbf: window.not_before(),
        exp: window.not_after(),
        iat: now.trunc_subsecs(0),
        jti: Uuid::new_v4().simple().to_string(),
        sans: request.sans.clone(),
    };

    let (compact, header, verification) = {
        let unlocked = key.unlock(passphrase)?;
        let mut header = Header::new(unlocked.algorithm().jwt());
        header.kid = Some(provisioner.kid().to_string());
        let compact = jsonwebtoken::encode(&header, &claims, &unlocked.encoding_key()?)
            .map_err(|e| Error::signing_failed(format!("cannot sign token: {}", e)))?;
        (compact, header, unlocked.verification_key()?)
    };

    debug!("Self-checking token {} for '{}'", claims.jti, claims.sub);
    validator::validate(&compact, provisioner, &verification, || claims.nbf)
        .map_err(|e| Error::signing_failed(format!("minted token does not validate: {}", e)))?;

    info!(
        "Minted {:?} token {} for '{}', valid {} - {}",
        header.alg,
        claims.jti,
        claims.sub,
        window.not_before().to_rfc3339(),
        window.not_after().to_rfc3339()
    );
    Ok(AuthToken::new(compact, header, claims))
}

//------------ Tests ---------------------------------------------------------

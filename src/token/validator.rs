//! Checks tokens against a provisioner's key and a point in time.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, errors::ErrorKind as JwtErrorKind};
use log::trace;

use crate::{
    commons::error::Error,
    token::{
        claims::Claims,
        provisioner::{ProvisionerRef, VerificationKey},
    },
};

/// Validates a token and returns its claims.
///
/// The signature is checked before anything in the token is trusted,
/// including the binding to `provisioner`. Only then is the validity window
/// compared with the time returned by `now`.
pub fn validate<F>(token: &str, provisioner: &ProvisionerRef, key: &VerificationKey, now: F) -> Result<Claims, Error>
where
    F: FnOnce() -> DateTime<Utc>,
{
    let token = token.trim();
    let header = jsonwebtoken::decode_header(token).map_err(jwt_error)?;

    let algorithm = key.algorithm();
    if header.alg != algorithm.jwt() {
        return Err(Error::signature_invalid(format!(
            "token is signed with {:?}, provisioner key uses {}",
            header.alg, algorithm
        )));
    }

    // The clock is injected, so the decoder must not look at it.
    let mut validation = Validation::new(algorithm.jwt());
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp", "nbf"]);

    let claims = jsonwebtoken::decode::<Claims>(token, &key.decoding_key()?, &validation)
        .map_err(jwt_error)?
        .claims;

    if header.kid.as_deref() != Some(provisioner.kid()) {
        return Err(Error::signature_invalid(format!(
            "token key id {:?} does not match provisioner key id '{}'",
            header.kid,
            provisioner.kid()
        )));
    }
    if claims.iss != provisioner.issuer() {
        return Err(Error::signature_invalid(format!(
            "token issuer '{}' does not match provisioner '{}'",
            claims.iss,
            provisioner.issuer()
        )));
    }
    if claims.sub.is_empty() {
        return Err(Error::malformed("token has an empty subject"));
    }
    if claims.nbf >= claims.exp {
        return Err(Error::malformed("token notBefore is not before notAfter"));
    }

    let now = now();
    if now < claims.nbf {
        return Err(Error::NotYetValid(format!(
            "token is valid from {}, it is now {}",
            claims.nbf.to_rfc3339(),
            now.to_rfc3339()
        )));
    }
    if now > claims.exp {
        return Err(Error::Expired(format!(
            "token expired at {}, it is now {}",
            claims.exp.to_rfc3339(),
            now.to_rfc3339()
        )));
    }

    trace!("Validated token {} for '{}'", claims.jti, claims.sub);
    Ok(claims)
}

/// Decodes the claims of a token without verifying anything.
///
/// Only use this to show what a token says. Nothing returned here can be
/// trusted.
pub fn decode_unverified(token: &str) -> Result<Claims, Error> {
    let token = token.trim();
    let header = jsonwebtoken::decode_header(token).map_err(jwt_error)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(jwt_error)
}

/// Tokens that cannot be parsed are malformed, everything else failed
/// verification.
fn jwt_error(err: jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        JwtErrorKind::InvalidToken
        | JwtErrorKind::Base64(_)
        | JwtErrorKind::Json(_)
        | JwtErrorKind::Utf8(_)
        | JwtErrorKind::MissingRequiredClaim(_) => Error::malformed(format!("cannot decode token: {}", err)),
        _ => Error::signature_invalid(format!("cannot verify token: {}", err)),
    }
}

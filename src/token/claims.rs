//! The content of a one-time token.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::Header;
use serde::{Deserialize, Serialize};

//------------ Claims --------------------------------------------------------

/// The claims a token asserts.
///
/// Times travel as seconds since the Unix epoch. A token whose times fall
/// outside what a `DateTime` can hold does not decode at all.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub nbf: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    pub jti: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,
}

impl Claims {
    pub fn not_before(&self) -> DateTime<Utc> {
        self.nbf
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.exp
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.iat
    }
}

//------------ AuthToken -----------------------------------------------------

/// A signed token in JWS compact serialization, with its decoded claims.
#[derive(Clone, Debug)]
pub struct AuthToken {
    compact: String,
    header: Header,
    claims: Claims,
}

impl AuthToken {
    pub(super) fn new(compact: String, header: Header, claims: Claims) -> Self {
        AuthToken { compact, header, claims }
    }

    pub fn as_str(&self) -> &str {
        &self.compact
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.claims.nbf
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.claims.exp
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.compact)
    }
}

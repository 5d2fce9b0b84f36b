//! Formatting command results for users.

use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    cert::IssuedCertificate,
    commons::error::Error,
    token::{AuthToken, Claims},
    trust::RootCertificate,
};

//------------ ReportFormat --------------------------------------------------

/// The format to show command results in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, ReportError> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(ReportError::UnrecognisedFormat(s.to_string())),
        }
    }
}

//------------ ReportError ---------------------------------------------------

#[derive(Clone, Debug)]
pub enum ReportError {
    UnrecognisedFormat(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::UnrecognisedFormat(s) => {
                write!(f, "This report format is not recognised: {}", s)
            }
        }
    }
}

impl std::error::Error for ReportError {}

//------------ Outcome -------------------------------------------------------

/// What a successful command has to tell.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Root(RootInfo),
    Token(TokenInfo),
    Certificate(CertificateInfo),
    Claims(ClaimsInfo),
}

impl Outcome {
    pub fn report(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Json => serde_json::to_string_pretty(self)
                .unwrap_or_else(|e| format!("{{\"error\": \"cannot serialize report: {}\"}}", e)),
            ReportFormat::Text => match self {
                Outcome::Root(info) => info.text(),
                Outcome::Token(info) => info.token.clone(),
                Outcome::Certificate(info) => info.text(),
                Outcome::Claims(info) => info.text(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RootInfo {
    pub path: PathBuf,
    pub subject: String,
    pub fingerprint: String,
    pub not_after: DateTime<Utc>,
}

impl RootInfo {
    pub fn new(root: &RootCertificate, path: PathBuf) -> Self {
        RootInfo {
            path,
            subject: root.subject(),
            fingerprint: root.fingerprint().to_string(),
            not_after: root.not_after(),
        }
    }

    fn text(&self) -> String {
        format!(
            "The root certificate has been saved in {}.\nSubject:     {}\nFingerprint: {}\nNot after:   {}",
            self.path.display(),
            self.subject,
            self.fingerprint,
            self.not_after.to_rfc3339()
        )
    }
}

/// A freshly minted token. In text format only the token itself is shown,
/// so it can be captured by scripts.
#[derive(Clone, Debug, Serialize)]
pub struct TokenInfo {
    pub token: String,
    pub jti: String,
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl From<&AuthToken> for TokenInfo {
    fn from(token: &AuthToken) -> Self {
        TokenInfo {
            token: token.as_str().to_string(),
            jti: token.claims().jti.clone(),
            subject: token.subject().to_string(),
            not_before: token.not_before(),
            not_after: token.not_after(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CertificateInfo {
    pub certificate: PathBuf,
    pub key: Option<PathBuf>,
    pub subject: String,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    pub fn new(issued: &IssuedCertificate, certificate: PathBuf, key: Option<PathBuf>) -> Self {
        CertificateInfo {
            certificate,
            key,
            subject: issued.subject(),
            serial: issued.serial(),
            not_before: issued.not_before(),
            not_after: issued.not_after(),
        }
    }

    fn text(&self) -> String {
        let mut res = format!("Your certificate has been saved in {}.", self.certificate.display());
        if let Some(key) = &self.key {
            res.push_str(&format!("\nYour private key has been saved in {}.", key.display()));
        }
        res.push_str(&format!(
            "\nSubject:   {}\nSerial:    {}\nNot after: {}",
            self.subject,
            self.serial,
            self.not_after.to_rfc3339()
        ));
        res
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ClaimsInfo {
    pub valid: bool,
    pub claims: Claims,
}

impl ClaimsInfo {
    fn text(&self) -> String {
        let mut res = String::new();
        res.push_str(&format!("Subject:    {}\n", self.claims.sub));
        res.push_str(&format!("Issuer:     {}\n", self.claims.iss));
        if let Some(aud) = &self.claims.aud {
            res.push_str(&format!("Audience:   {}\n", aud));
        }
        res.push_str(&format!("Not before: {}\n", self.claims.not_before().to_rfc3339()));
        res.push_str(&format!("Not after:  {}\n", self.claims.not_after().to_rfc3339()));
        res.push_str(&format!("Token id:   {}", self.claims.jti));
        for san in &self.claims.sans {
            res.push_str(&format!("\nSAN:        {}", san));
        }
        res
    }
}

//------------ error report --------------------------------------------------

/// Formats an error for users, keeping the kind visible.
pub fn error_report(error: &Error, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => format!("error [{}]: {}", error.kind(), error),
        ReportFormat::Json => serde_json::json!({
            "error": error.kind().as_str(),
            "message": error.to_string(),
        })
        .to_string(),
    }
}

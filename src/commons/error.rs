//! Defines all caboot errors.
//!
//! Every operation in the protocol core reports failure through [`Error`].
//! All errors are terminal to the operation that raised them. The CLI
//! layer maps the [`ErrorKind`] to a message for the user, the detail
//! string explains what went wrong.

use std::{fmt, io};

use crate::commons::util::httpclient;

//------------ ErrorKind -----------------------------------------------------

/// The kind of an [`Error`], without the detail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    FingerprintMismatch,
    MalformedCertificate,
    InvalidTimeWindow,
    KeyDecryptionFailed,
    SigningFailed,
    Malformed,
    SignatureInvalid,
    Expired,
    NotYetValid,
    ConnectionError,
    AuthRejected,
    ServerSigningError,
    CertificateExpired,
    NotFound,
    InvalidRequest,
    Io,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::FingerprintMismatch => "fingerprint-mismatch",
            ErrorKind::MalformedCertificate => "malformed-certificate",
            ErrorKind::InvalidTimeWindow => "invalid-time-window",
            ErrorKind::KeyDecryptionFailed => "key-decryption-failed",
            ErrorKind::SigningFailed => "signing-failed",
            ErrorKind::Malformed => "malformed-token",
            ErrorKind::SignatureInvalid => "signature-invalid",
            ErrorKind::Expired => "token-expired",
            ErrorKind::NotYetValid => "token-not-yet-valid",
            ErrorKind::ConnectionError => "connection-error",
            ErrorKind::AuthRejected => "auth-rejected",
            ErrorKind::ServerSigningError => "server-signing-error",
            ErrorKind::CertificateExpired => "certificate-expired",
            ErrorKind::NotFound => "not-found",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::Io => "io-error",
            ErrorKind::Config => "config-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // Trust bootstrap
    //-----------------------------------------------------------------
    FingerprintMismatch(String),
    MalformedCertificate(String),
    NotFound(String),

    //-----------------------------------------------------------------
    // Token minting and validation
    //-----------------------------------------------------------------
    InvalidTimeWindow(String),
    KeyDecryptionFailed(String),
    SigningFailed(String),
    Malformed(String),
    SignatureInvalid(String),
    Expired(String),
    NotYetValid(String),

    //-----------------------------------------------------------------
    // Talking to the CA
    //-----------------------------------------------------------------
    ConnectionError(String),
    AuthRejected(String),
    ServerSigningError(String),
    CertificateExpired(String),

    //-----------------------------------------------------------------
    // Local issues
    //-----------------------------------------------------------------
    InvalidRequest(String),
    Io(IoError),
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FingerprintMismatch(_) => ErrorKind::FingerprintMismatch,
            Error::MalformedCertificate(_) => ErrorKind::MalformedCertificate,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidTimeWindow(_) => ErrorKind::InvalidTimeWindow,
            Error::KeyDecryptionFailed(_) => ErrorKind::KeyDecryptionFailed,
            Error::SigningFailed(_) => ErrorKind::SigningFailed,
            Error::Malformed(_) => ErrorKind::Malformed,
            Error::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Error::Expired(_) => ErrorKind::Expired,
            Error::NotYetValid(_) => ErrorKind::NotYetValid,
            Error::ConnectionError(_) => ErrorKind::ConnectionError,
            Error::AuthRejected(_) => ErrorKind::AuthRejected,
            Error::ServerSigningError(_) => ErrorKind::ServerSigningError,
            Error::CertificateExpired(_) => ErrorKind::CertificateExpired,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Io(_) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns whether a caller may reasonably retry the operation.
    ///
    /// Only transport problems qualify. A retried issuance needs a freshly
    /// minted token.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConnectionError
    }

    pub fn fingerprint_mismatch(msg: impl fmt::Display) -> Self {
        Error::FingerprintMismatch(msg.to_string())
    }

    pub fn malformed_certificate(msg: impl fmt::Display) -> Self {
        Error::MalformedCertificate(msg.to_string())
    }

    pub fn not_found(msg: impl fmt::Display) -> Self {
        Error::NotFound(msg.to_string())
    }

    pub fn invalid_time_window(msg: impl fmt::Display) -> Self {
        Error::InvalidTimeWindow(msg.to_string())
    }

    pub fn key_decryption_failed(msg: impl fmt::Display) -> Self {
        Error::KeyDecryptionFailed(msg.to_string())
    }

    pub fn signing_failed(msg: impl fmt::Display) -> Self {
        Error::SigningFailed(msg.to_string())
    }

    pub fn malformed(msg: impl fmt::Display) -> Self {
        Error::Malformed(msg.to_string())
    }

    pub fn signature_invalid(msg: impl fmt::Display) -> Self {
        Error::SignatureInvalid(msg.to_string())
    }

    pub fn connection(msg: impl fmt::Display) -> Self {
        Error::ConnectionError(msg.to_string())
    }

    pub fn auth_rejected(msg: impl fmt::Display) -> Self {
        Error::AuthRejected(msg.to_string())
    }

    pub fn server_signing(msg: impl fmt::Display) -> Self {
        Error::ServerSigningError(msg.to_string())
    }

    pub fn certificate_expired(msg: impl fmt::Display) -> Self {
        Error::CertificateExpired(msg.to_string())
    }

    pub fn invalid_request(msg: impl fmt::Display) -> Self {
        Error::InvalidRequest(msg.to_string())
    }

    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Maps an error from the HTTP layer to the issuance taxonomy.
    ///
    /// Requests that could not be made or completed are connection errors,
    /// a 4xx response is a rejection, anything else the server got wrong
    /// is a signing error.
    pub fn from_http(e: httpclient::Error) -> Self {
        use httpclient::Error as HttpError;

        match e {
            HttpError::RequestBuild(..)
            | HttpError::RequestBuildHttpsCert(..)
            | HttpError::RequestExecute(..) => Error::connection(e),
            HttpError::Forbidden(_) => Error::auth_rejected(e),
            HttpError::ErrorResponseWithJson(_, status, ref res) => {
                if status.is_client_error() {
                    Error::auth_rejected(res.message())
                } else {
                    Error::server_signing(format!("{}: {}", status, res.message()))
                }
            }
            HttpError::ErrorResponseWithBody(_, status, ref body) => {
                if status.is_client_error() {
                    Error::auth_rejected(body)
                } else {
                    Error::server_signing(format!("{}: {}", status, body))
                }
            }
            HttpError::Response(..) => Error::server_signing(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::FingerprintMismatch(msg) => write!(f, "Fingerprint mismatch: {}", msg),
            Error::MalformedCertificate(msg) => write!(f, "Malformed certificate: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::InvalidTimeWindow(msg) => write!(f, "Invalid token validity window: {}", msg),
            Error::KeyDecryptionFailed(msg) => write!(f, "Cannot decrypt signing key: {}", msg),
            Error::SigningFailed(msg) => write!(f, "Cannot sign token: {}", msg),
            Error::Malformed(msg) => write!(f, "Malformed token: {}", msg),
            Error::SignatureInvalid(msg) => write!(f, "Invalid token signature: {}", msg),
            Error::Expired(msg) => write!(f, "Token expired: {}", msg),
            Error::NotYetValid(msg) => write!(f, "Token not yet valid: {}", msg),
            Error::ConnectionError(msg) => write!(f, "Cannot connect to CA: {}", msg),
            Error::AuthRejected(msg) => write!(f, "CA rejected the request: {}", msg),
            Error::ServerSigningError(msg) => write!(f, "CA failed to issue a certificate: {}", msg),
            Error::CertificateExpired(msg) => write!(f, "Certificate expired: {}", msg),
            Error::InvalidRequest(msg) => write!(f, "Invalid certificate request: {}", msg),
            Error::Io(e) => e.fmt(f),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

//------------ IoError -------------------------------------------------------

/// An I/O error with some context on what we were doing.
#[derive(Debug)]
pub struct IoError {
    context: String,
    cause: io::Error,
}

impl IoError {
    pub fn new(context: impl fmt::Display, cause: io::Error) -> Self {
        IoError {
            context: context.to_string(),
            cause,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.cause.kind() == io::ErrorKind::NotFound
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.cause)
    }
}

impl std::error::Error for IoError {}

//------------ Tests ---------------------------------------------------------

//! Various caboot-wide constants.

//------------ Version -------------------------------------------------------

/// The version of caboot, taken from Cargo.toml.
pub const CABOOT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The friendly name of the `caboot` binary.
pub const CABOOT_CLIENT_APP: &str = "caboot";

//------------ Environment Variables ----------------------------------------

/// The environment variable with the path to the config file.
pub const CABOOT_ENV_CONFIG: &str = "CABOOT_CONFIG";

/// The environment variable with the CA URL.
pub const CABOOT_ENV_CA_URL: &str = "CABOOT_CA_URL";

/// The environment variable with the path to the pinned root certificate.
pub const CABOOT_ENV_ROOT: &str = "CABOOT_ROOT";

//------------ CA Endpoints ----------------------------------------------------

/// Path below the CA URL serving root certificates by fingerprint.
pub const CA_PATH_ROOT: &str = "root";

/// Path below the CA URL where CSRs are signed.
pub const CA_PATH_SIGN: &str = "sign";

/// Path below the CA URL where certificates are renewed.
pub const CA_PATH_RENEW: &str = "renew";

//------------ Defaults --------------------------------------------------------

/// Default timeout for any request to the CA.
pub const DFLT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default token lifetime when no `notAfter` is given.
pub const DFLT_TOKEN_LIFETIME_SECS: i64 = 300;

/// How far the default `notBefore` is backdated.
pub const DFLT_TOKEN_CLOCK_SKEW_SECS: i64 = 60;

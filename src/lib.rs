//! The _caboot_ library crate.
//!
//! Bootstraps trust in a certificate authority from a root fingerprint,
//! mints one-time provisioner tokens and uses them to obtain and renew
//! certificates.

pub mod cert;
pub mod cli;
pub mod client;
pub mod commons;
pub mod config;
pub mod constants;
pub mod test;
pub mod token;
pub mod trust;

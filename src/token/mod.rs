//! One-time tokens that authorise certificate issuance.
//!
//! Tokens are JWTs signed by a provisioner. The [`minter`] creates them, the
//! [`validator`] checks them, both for the minter's own sanity check and for
//! anyone who needs to inspect a token client side.

mod claims;
pub mod minter;
pub mod provisioner;
pub mod time;
pub mod validator;

pub use self::{
    claims::{AuthToken, Claims},
    minter::{TokenRequest, mint},
    provisioner::{ProvisionerRef, SigningKey, TokenAlgorithm, UnlockedKey, VerificationKey},
    time::{TimeSpec, TokenLifetime, TokenWindow},
    validator::{decode_unverified, validate},
};

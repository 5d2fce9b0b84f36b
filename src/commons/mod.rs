//! Common types used by the various caboot components.
pub mod crypto;
pub mod error;
pub mod util;

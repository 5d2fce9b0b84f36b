//! Certificate requests and the certificates the CA issues for them.

mod issued;
mod request;

pub use self::{
    issued::{ClientIdentity, IssuedCertificate},
    request::{CertificateRequest, Csr, KeyType, San},
};

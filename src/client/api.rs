//! JSON bodies exchanged with the CA.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::cert::Csr;

//------------ SignRequest ---------------------------------------------------

/// Body of a request to the sign endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignRequest {
    pub token: String,

    /// The DER encoded CSR in standard base64.
    pub csr: String,
}

impl SignRequest {
    pub fn new(token: &str, csr: &Csr) -> Self {
        SignRequest {
            token: token.to_string(),
            csr: STANDARD.encode(csr.der()),
        }
    }

    pub fn csr_der(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.csr)
    }
}

//------------ SignResponse --------------------------------------------------

/// Body of a successful sign or renew response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    /// Base64 DER certificates, leaf first.
    pub certificate_chain: Vec<String>,
}

impl SignResponse {
    pub fn from_chain(chain: &[X509]) -> Result<Self, openssl::error::ErrorStack> {
        let mut certificate_chain = Vec::with_capacity(chain.len());
        for cert in chain {
            certificate_chain.push(STANDARD.encode(cert.to_der()?));
        }
        Ok(SignResponse { certificate_chain })
    }

    /// Decodes the certificates, leaf first.
    pub fn decode_chain(&self) -> Result<Vec<X509>, String> {
        if self.certificate_chain.is_empty() {
            return Err("empty certificate chain".to_string());
        }
        self.certificate_chain
            .iter()
            .enumerate()
            .map(|(idx, encoded)| {
                let der = STANDARD
                    .decode(encoded)
                    .map_err(|e| format!("certificate {} is not base64: {}", idx, e))?;
                X509::from_der(&der).map_err(|e| format!("certificate {} cannot be parsed: {}", idx, e))
            })
            .collect()
    }
}

//------------ ErrorResponse -------------------------------------------------

/// Body of an error response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    message: String,
}

impl ErrorResponse {
    pub fn new(message: impl fmt::Display) -> Self {
        ErrorResponse {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn response_uses_camel_case() {
        let json = r#"{"certificateChain":["AAAA"]}"#;
        let res: SignResponse = serde_json::from_str(json).unwrap();
        assert_eq!(res.certificate_chain, vec!["AAAA".to_string()]);
        assert!(res.decode_chain().is_err());

        let res = SignResponse { certificate_chain: vec![] };
        assert!(res.decode_chain().is_err());
    }

    #[test]
    fn chain_survives_the_wire() {
        let pki = test::TestPki::generate();
        let leaf = pki.issue_leaf("svc", 1);
        let res = SignResponse::from_chain(&[leaf.cert.clone(), pki.intermediate.clone()]).unwrap();

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.starts_with(r#"{"certificateChain":["#));

        let chain: SignResponse = serde_json::from_str(&json).unwrap();
        let chain = chain.decode_chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].to_der().unwrap(), leaf.cert.to_der().unwrap());
    }

    #[test]
    fn error_response() {
        let res: ErrorResponse = serde_json::from_str(r#"{"message":"token is expired"}"#).unwrap();
        assert_eq!(res.message(), "token is expired");
        assert_eq!(res.to_string(), "token is expired");
    }
}

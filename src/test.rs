//! Helper functions for testing caboot.
//!
//! Everything here builds throw-away PKI material with openssl and panics
//! on failure. Not for use outside of tests.

use std::{
    io::{Read, Write},
    net::TcpListener,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{HasPublic, PKey, PKeyRef, Private},
    rsa::Rsa,
    ssl::{SslAcceptor, SslMethod, SslVerifyMode},
    symm::Cipher,
    x509::{
        X509, X509Builder, X509NameBuilder, X509Ref, X509Req,
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
            SubjectKeyIdentifier,
        },
    },
};
use reqwest::StatusCode;
use secrecy::SecretVec;
use url::Url;

use crate::{
    cert::ClientIdentity,
    client::{CaTransport, ErrorResponse, SignRequest, SignResponse, endpoint},
    commons::{crypto, util::httpclient},
    constants::{CA_PATH_RENEW, CA_PATH_ROOT, CA_PATH_SIGN},
    token::{self, ProvisionerRef, SigningKey, TokenLifetime, TokenRequest, VerificationKey},
    trust::{Fingerprint, TrustAnchor},
};

/// Validity of certificates the mock CA issues.
pub const MOCK_CA_CERT_DAYS: u32 = 30;

pub const PROVISIONER_KID: &str = "test-kid";
pub const PROVISIONER_ISSUER: &str = "admin@example.com";

//------------ Keys ----------------------------------------------------------

pub fn ec_p256_key() -> PKey<Private> {
    ec_key(Nid::X9_62_PRIME256V1)
}

pub fn ec_p384_key() -> PKey<Private> {
    ec_key(Nid::SECP384R1)
}

fn ec_key(curve: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(curve).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn ed25519_key() -> PKey<Private> {
    PKey::generate_ed25519().unwrap()
}

pub fn pem(key: &PKey<Private>) -> SecretVec<u8> {
    SecretVec::new(key.private_key_to_pem_pkcs8().unwrap())
}

pub fn ec_p256_pem() -> SecretVec<u8> {
    pem(&ec_p256_key())
}

pub fn ec_p384_pem() -> SecretVec<u8> {
    pem(&ec_p384_key())
}

pub fn rsa_pem() -> SecretVec<u8> {
    pem(&rsa_key())
}

pub fn ed25519_pem() -> SecretVec<u8> {
    pem(&ed25519_key())
}

/// Returns the key as encrypted PKCS#8 PEM.
pub fn encrypted_pem(key: &PKey<Private>, passphrase: &str) -> SecretVec<u8> {
    SecretVec::new(
        key.private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .unwrap(),
    )
}

//------------ Certificates --------------------------------------------------

fn serial() -> Asn1Integer {
    let mut bn = BigNum::new().unwrap();
    bn.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    bn.to_asn1_integer().unwrap()
}

fn days_from_now(days: i64) -> Asn1Time {
    let at = Utc::now() + chrono::Duration::days(days);
    Asn1Time::from_unix(at.timestamp()).unwrap()
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Profile {
    Ca,
    Client,
    Server,
}

/// Builds a certificate for `public_key`, signed by `issuer`, or
/// self-signed if there is no issuer.
fn build_cert<T: HasPublic>(
    common_name: &str,
    public_key: &PKeyRef<T>,
    issuer: Option<(&X509Ref, &PKeyRef<Private>)>,
    signing_key: &PKeyRef<Private>,
    not_before: Asn1Time,
    not_after: Asn1Time,
    profile: Profile,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((issuer_cert, _)) => builder.set_issuer_name(issuer_cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(public_key).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();

    let issuer_cert = issuer.map(|(cert, _)| cert);
    if profile == Profile::Ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
    } else {
        builder
            .append_extension(BasicConstraints::new().critical().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().digital_signature().build().unwrap())
            .unwrap();
    }
    if profile == Profile::Server {
        let san = SubjectAlternativeName::new()
            .dns(common_name)
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(issuer_cert, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder
            .append_extension(ExtendedKeyUsage::new().server_auth().build().unwrap())
            .unwrap();
    }

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(issuer_cert, None))
        .unwrap();
    builder.append_extension(ski).unwrap();
    if issuer_cert.is_some() {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(issuer_cert, None))
            .unwrap();
        builder.append_extension(aki).unwrap();
    }

    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

//------------ TestPki -------------------------------------------------------

/// A root, an intermediate that issues leaves, and a provisioner.
#[derive(Clone)]
pub struct TestPki {
    pub root: X509,
    pub root_key: PKey<Private>,
    pub intermediate: X509,
    pub intermediate_key: PKey<Private>,
    pub provisioner: ProvisionerRef,
    pub provisioner_key: PKey<Private>,
}

impl TestPki {
    pub fn generate() -> Self {
        Self::generate_named("Test Root CA")
    }

    pub fn generate_named(root_cn: &str) -> Self {
        let root_key = ec_p256_key();
        let root = build_cert(
            root_cn,
            &root_key,
            None,
            &root_key,
            days_from_now(-1),
            days_from_now(3650),
            Profile::Ca,
        );

        let intermediate_key = ec_p256_key();
        let intermediate = build_cert(
            "Test Intermediate CA",
            &intermediate_key,
            Some((&root, &root_key)),
            &root_key,
            days_from_now(-1),
            days_from_now(1825),
            Profile::Ca,
        );

        TestPki {
            root,
            root_key,
            intermediate,
            intermediate_key,
            provisioner: ProvisionerRef::new(PROVISIONER_KID, PROVISIONER_ISSUER),
            provisioner_key: ec_p256_key(),
        }
    }

    pub fn anchor(&self) -> TrustAnchor {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root_ca.crt");
        std::fs::write(&path, self.root.to_pem().unwrap()).unwrap();
        TrustAnchor::load(&path).unwrap()
    }

    pub fn root_fingerprint(&self) -> String {
        Fingerprint::of_der(&self.root.to_der().unwrap()).to_string()
    }

    /// Issues a leaf with a fresh key, valid from a minute ago.
    pub fn issue_leaf(&self, common_name: &str, days: i64) -> TestLeaf {
        let key = ec_p256_key();
        let not_before = Asn1Time::from_unix((Utc::now() - chrono::Duration::minutes(1)).timestamp()).unwrap();
        let cert = self.issue(common_name, &key, not_before, days_from_now(days));
        TestLeaf { cert, key }
    }

    /// Issues a certificate for an existing key, valid for the days the
    /// mock CA hands out.
    pub fn issue_for<T: HasPublic>(&self, common_name: &str, public_key: &PKeyRef<T>) -> X509 {
        let not_before = Asn1Time::from_unix((Utc::now() - chrono::Duration::minutes(1)).timestamp()).unwrap();
        self.issue(common_name, public_key, not_before, days_from_now(MOCK_CA_CERT_DAYS.into()))
    }

    /// Issues a TLS server certificate for `localhost` and `127.0.0.1`.
    pub fn issue_server_leaf(&self) -> TestLeaf {
        let key = ec_p256_key();
        let cert = build_cert(
            "localhost",
            &key,
            Some((&self.intermediate, &self.intermediate_key)),
            &self.intermediate_key,
            days_from_now(-1),
            days_from_now(1),
            Profile::Server,
        );
        TestLeaf { cert, key }
    }

    /// Issues a leaf that expired yesterday.
    pub fn issue_expired_leaf(&self, common_name: &str) -> TestLeaf {
        let key = ec_p256_key();
        let cert = self.issue(common_name, &key, days_from_now(-10), days_from_now(-1));
        TestLeaf { cert, key }
    }

    fn issue<T: HasPublic>(
        &self,
        common_name: &str,
        public_key: &PKeyRef<T>,
        not_before: Asn1Time,
        not_after: Asn1Time,
    ) -> X509 {
        build_cert(
            common_name,
            public_key,
            Some((&self.intermediate, &self.intermediate_key)),
            &self.intermediate_key,
            not_before,
            not_after,
            Profile::Client,
        )
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::pem(pem(&self.provisioner_key))
    }

    pub fn verification_key(&self) -> VerificationKey {
        self.signing_key().unlock(None).unwrap().verification_key().unwrap()
    }

    /// Mints a token with the default window around `now`.
    pub fn token(&self, subject: &str, now: DateTime<Utc>) -> String {
        token::mint(
            &TokenRequest::new(subject),
            &self.provisioner,
            &self.signing_key(),
            None,
            now,
            &TokenLifetime::default(),
        )
        .unwrap()
        .as_str()
        .to_string()
    }
}

//------------ TestLeaf ------------------------------------------------------

pub struct TestLeaf {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl TestLeaf {
    pub fn identity(&self, pki: &TestPki) -> ClientIdentity {
        ClientIdentity::new(vec![self.cert.clone(), pki.intermediate.clone()], self.key.clone()).unwrap()
    }
}

//------------ MockCa --------------------------------------------------------

#[derive(Clone, Debug)]
enum Behaviour {
    Normal,
    Unreachable,
    Failing,
    Rejecting(String),
    ForeignChain,
    Rekeying,
    StaleRenewal,
}

/// A CA in memory that implements [`CaTransport`].
///
/// It validates tokens against the provisioner of its [`TestPki`], signs
/// CSRs with the intermediate and counts every call.
pub struct MockCa {
    pki: TestPki,
    foreign: Option<TestPki>,
    served_root: Bytes,
    behaviour: Behaviour,
    fetch_calls: AtomicUsize,
    sign_calls: AtomicUsize,
    renew_calls: AtomicUsize,
    last_sign_request: Mutex<Option<SignRequest>>,
}

impl MockCa {
    pub fn new(pki: &TestPki) -> Self {
        MockCa {
            pki: pki.clone(),
            foreign: None,
            served_root: Bytes::from(pki.root.to_pem().unwrap()),
            behaviour: Behaviour::Normal,
            fetch_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            last_sign_request: Mutex::new(None),
        }
    }

    /// Serves these bytes as the root certificate.
    pub fn serving_root(mut self, bytes: Bytes) -> Self {
        self.served_root = bytes;
        self
    }

    /// Fails every request as if the CA could not be reached.
    pub fn unreachable(mut self) -> Self {
        self.behaviour = Behaviour::Unreachable;
        self
    }

    /// Answers every request with an internal server error.
    pub fn failing(mut self) -> Self {
        self.behaviour = Behaviour::Failing;
        self
    }

    /// Rejects every sign and renew request with the message.
    pub fn rejecting(mut self, message: &str) -> Self {
        self.behaviour = Behaviour::Rejecting(message.to_string());
        self
    }

    /// Issues certificates from a different PKI.
    pub fn with_foreign_chain(mut self) -> Self {
        self.foreign = Some(TestPki::generate_named("Foreign Root CA"));
        self.behaviour = Behaviour::ForeignChain;
        self
    }

    /// Renews certificates with a key of its own choosing.
    pub fn with_rekeying(mut self) -> Self {
        self.behaviour = Behaviour::Rekeying;
        self
    }

    /// Renews certificates without moving their expiry.
    pub fn with_stale_renewal(mut self) -> Self {
        self.behaviour = Behaviour::StaleRenewal;
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn last_sign_request(&self) -> Option<SignRequest> {
        self.last_sign_request.lock().unwrap().clone()
    }

    fn misbehave(&self, uri: &str) -> Option<httpclient::Error> {
        match &self.behaviour {
            Behaviour::Unreachable => Some(httpclient::Error::execute(uri, "connection refused")),
            Behaviour::Failing => Some(httpclient::Error::ErrorResponseWithBody(
                uri.to_string(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )),
            Behaviour::Rejecting(message) => Some(rejected(uri, StatusCode::FORBIDDEN, message)),
            _ => None,
        }
    }

    fn issuing_pki(&self) -> &TestPki {
        match (&self.behaviour, &self.foreign) {
            (Behaviour::ForeignChain, Some(foreign)) => foreign,
            _ => &self.pki,
        }
    }

    fn respond<T: HasPublic>(
        &self,
        uri: &str,
        common_name: &str,
        public_key: &PKeyRef<T>,
        not_after: DateTime<Utc>,
    ) -> Result<SignResponse, httpclient::Error> {
        let pki = self.issuing_pki();
        let not_before = Asn1Time::from_unix((Utc::now() - chrono::Duration::minutes(1)).timestamp()).unwrap();
        let not_after = Asn1Time::from_unix(not_after.timestamp()).unwrap();
        let leaf = pki.issue(common_name, public_key, not_before, not_after);
        SignResponse::from_chain(&[leaf, pki.intermediate.clone()])
            .map_err(|e| httpclient::Error::response(uri, e))
    }
}

fn rejected(uri: &str, status: StatusCode, message: impl std::fmt::Display) -> httpclient::Error {
    httpclient::Error::ErrorResponseWithJson(uri.to_string(), status, ErrorResponse::new(message))
}

impl CaTransport for MockCa {
    async fn fetch_root(&self, ca_url: &Url, fingerprint: &Fingerprint) -> Result<Bytes, httpclient::Error> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let uri = endpoint(ca_url, &format!("{}/{}", CA_PATH_ROOT, fingerprint));
        match self.behaviour {
            Behaviour::Unreachable => Err(httpclient::Error::execute(&uri, "connection refused")),
            _ => Ok(self.served_root.clone()),
        }
    }

    async fn sign(
        &self,
        ca_url: &Url,
        _anchor: &TrustAnchor,
        request: &SignRequest,
    ) -> Result<SignResponse, httpclient::Error> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_sign_request.lock().unwrap() = Some(request.clone());

        let uri = endpoint(ca_url, CA_PATH_SIGN);
        if let Some(e) = self.misbehave(&uri) {
            return Err(e);
        }

        let claims = token::validate(
            &request.token,
            &self.pki.provisioner,
            &self.pki.verification_key(),
            Utc::now,
        )
        .map_err(|e| rejected(&uri, StatusCode::UNAUTHORIZED, e))?;

        let der = request
            .csr_der()
            .map_err(|e| rejected(&uri, StatusCode::BAD_REQUEST, format!("invalid CSR encoding: {}", e)))?;
        let csr = X509Req::from_der(&der).map_err(|e| rejected(&uri, StatusCode::BAD_REQUEST, e))?;
        let subject = crypto::display_name(csr.subject_name());
        if subject != claims.sub {
            return Err(rejected(
                &uri,
                StatusCode::FORBIDDEN,
                format!("token subject '{}' does not match CSR subject '{}'", claims.sub, subject),
            ));
        }
        let public_key = csr
            .public_key()
            .map_err(|e| rejected(&uri, StatusCode::BAD_REQUEST, e))?;

        let not_after = Utc::now() + chrono::Duration::days(MOCK_CA_CERT_DAYS.into());
        self.respond(&uri, &subject, &public_key, not_after)
    }

    async fn renew(
        &self,
        ca_url: &Url,
        _anchor: &TrustAnchor,
        identity: &ClientIdentity,
    ) -> Result<SignResponse, httpclient::Error> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);

        let uri = endpoint(ca_url, CA_PATH_RENEW);
        if let Some(e) = self.misbehave(&uri) {
            return Err(e);
        }

        // What the TLS handshake would check.
        crypto::verify_chain(&self.pki.root, identity.leaf(), &[self.pki.intermediate.clone()])
            .map_err(|_| httpclient::Error::forbidden(&uri))?;

        // Renewals extend the current expiry.
        let subject = identity.subject();
        let not_after = identity.not_after() + chrono::Duration::days(MOCK_CA_CERT_DAYS.into());
        match self.behaviour {
            Behaviour::Rekeying => self.respond(&uri, &subject, &ec_p256_key(), not_after),
            Behaviour::StaleRenewal => self.respond(&uri, &subject, identity.key(), identity.not_after()),
            _ => self.respond(&uri, &subject, identity.key(), not_after),
        }
    }
}

//------------ TlsServer -----------------------------------------------------

/// How a [`TlsServer`] answers the request it reads.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Sends the status with a JSON body.
    Json(StatusCode, String),

    /// Promises a body, sends part of it, then hangs up.
    Truncated,

    /// Reads the request and never answers.
    Silent,
}

/// What a [`TlsServer`] saw of the request it served.
#[derive(Clone, Debug)]
pub struct Served {
    pub head: String,
    pub body: String,
    pub client_subject: Option<String>,
}

/// An HTTPS server on a local port that serves a single connection.
///
/// The server certificate is issued by the intermediate of a [`TestPki`].
/// With a client CA, the handshake requires a client certificate that
/// chains to its root.
pub struct TlsServer {
    url: Url,
    handle: JoinHandle<Option<Served>>,
}

impl TlsServer {
    pub fn start(pki: &TestPki, client_ca: Option<&TestPki>, reply: Reply) -> Self {
        let server = pki.issue_server_leaf();
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_private_key(&server.key).unwrap();
        acceptor.set_certificate(&server.cert).unwrap();
        acceptor.add_extra_chain_cert(pki.intermediate.clone()).unwrap();
        if let Some(ca) = client_ca {
            acceptor.cert_store_mut().add_cert(ca.root.clone()).unwrap();
            acceptor.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }
        let acceptor = acceptor.build();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("https://127.0.0.1:{}/", listener.local_addr().unwrap().port())).unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().ok()?;
            let mut stream = acceptor.accept(stream).ok()?;
            let client_subject = stream
                .ssl()
                .peer_certificate()
                .map(|cert| crypto::display_name(cert.subject_name()));
            let (head, body) = read_request(&mut stream)?;

            match reply {
                Reply::Json(status, json) => {
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        json.len(),
                        json
                    );
                    stream.write_all(response.as_bytes()).ok()?;
                }
                Reply::Truncated => {
                    let response = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 500\r\nConnection: close\r\n\r\n{\"certificateChain\":[";
                    stream.write_all(response.as_bytes()).ok()?;
                }
                Reply::Silent => thread::sleep(Duration::from_secs(5)),
            }
            stream.flush().ok()?;
            let _ = stream.shutdown();

            Some(Served {
                head,
                body,
                client_subject,
            })
        });

        TlsServer { url, handle }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Waits for the connection to end.
    ///
    /// Returns `None` if the handshake failed or no full request arrived.
    pub fn finish(self) -> Option<Served> {
        self.handle.join().unwrap()
    }
}

/// Reads an HTTP/1.1 request head and its `Content-Length` body.
fn read_request(stream: &mut impl Read) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[body_start..body_start + length]).to_string();
    Some((head, body))
}

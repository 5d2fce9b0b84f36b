//! Some helper functions for HTTP calls
use std::{fmt, time::Duration};

use bytes::Bytes;
use log::trace;
use reqwest::{
    Response, StatusCode,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{client::api::ErrorResponse, constants::CABOOT_VERSION};

const JSON_CONTENT: &str = "application/json";

/// Client used to download a root certificate before any trust exists.
///
/// The server certificate is not verified. Whatever comes back must be
/// checked against a pinned fingerprint before it is used for anything.
#[allow(clippy::result_large_err)]
pub fn bootstrap_client(uri: &str, timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::ClientBuilder::new()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| Error::request_build(uri, e))
}

/// Client that only trusts the given anchor, optionally presenting a
/// client identity for mutual TLS.
///
/// The built-in web PKI roots are switched off, so the connection fails
/// unless the server chain validates against the anchor. Tokens and client
/// certificates only ever travel over HTTPS, a plain `http` URI fails here
/// before anything is sent.
#[allow(clippy::result_large_err)]
pub fn anchored_client(
    uri: &str,
    anchor: reqwest::Certificate,
    identity: Option<reqwest::Identity>,
    timeout: Duration,
) -> Result<reqwest::Client, Error> {
    if !is_https(uri) {
        return Err(Error::request_build(uri, "refusing to contact the CA without TLS"));
    }

    let mut builder = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .https_only(true)
        .redirect(reqwest::redirect::Policy::none())
        .tls_built_in_root_certs(false)
        .add_root_certificate(anchor);

    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }

    builder.build().map_err(|e| Error::request_build(uri, e))
}

fn is_https(uri: &str) -> bool {
    uri.get(..8).is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
}

/// Performs a GET request and returns the raw body.
pub async fn get_bytes(client: &reqwest::Client, uri: &str) -> Result<Bytes, Error> {
    let headers = headers(uri, None)?;
    let res = client
        .get(uri)
        .headers(headers)
        .send()
        .await
        .map_err(|e| Error::execute(uri, e))?;

    match res.status() {
        StatusCode::OK => {
            let bytes = res
                .bytes()
                .await
                .map_err(|e| Error::execute(uri, format!("cannot get body: {}", e)))?;
            if bytes.is_empty() {
                Err(Error::response(uri, "expected response body"))
            } else {
                Ok(bytes)
            }
        }
        _ => Err(Error::from_res(uri, res).await),
    }
}

/// Performs a POST of data that can be serialized into json, and expects
/// a json response that can be deserialized into the an owned value of the
/// expected type.
pub async fn post_json_with_response<T: DeserializeOwned>(
    client: &reqwest::Client,
    uri: &str,
    data: impl Serialize,
) -> Result<T, Error> {
    let body = serde_json::to_string(&data).map_err(|e| Error::request_build_json(uri, e))?;
    let headers = headers(uri, Some(JSON_CONTENT))?;

    trace!("POST {} ({} bytes)", uri, body.len());
    let res = client
        .post(uri)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| Error::execute(uri, e))?;

    process_json_response(uri, res).await
}

/// Performs a POST with no data to the given URI and expects a response.
pub async fn post_empty_with_response<T: DeserializeOwned>(
    client: &reqwest::Client,
    uri: &str,
) -> Result<T, Error> {
    let headers = headers(uri, None)?;

    trace!("POST {} (empty)", uri);
    let res = client
        .post(uri)
        .headers(headers)
        .send()
        .await
        .map_err(|e| Error::execute(uri, e))?;

    process_json_response(uri, res).await
}

#[allow(clippy::result_large_err)]
fn headers(uri: &str, content_type: Option<&str>) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();

    let ua_string = format!("caboot/{}", CABOOT_VERSION);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&ua_string).map_err(|e| Error::request_build(uri, e))?,
    );

    if let Some(content_type) = content_type {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type).map_err(|e| Error::request_build(uri, e))?,
        );
    }
    Ok(headers)
}

async fn process_json_response<T: DeserializeOwned>(uri: &str, res: Response) -> Result<T, Error> {
    match res.status() {
        StatusCode::OK | StatusCode::CREATED => {
            // Failing to read the body is a transport failure.
            let text = res
                .text()
                .await
                .map_err(|e| Error::execute(uri, format!("cannot get body: {}", e)))?;
            if text.is_empty() {
                return Err(Error::response(uri, "got empty response body"));
            }
            serde_json::from_str(&text)
                .map_err(|e| Error::response(uri, format!("could not parse JSON response: {}", e)))
        }
        StatusCode::FORBIDDEN => Err(Error::forbidden(uri)),
        _ => Err(Error::from_res(uri, res).await),
    }
}

//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type RootCertPath = String;
type ErrorMessage = String;

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestBuildHttpsCert(RootCertPath, ErrorMessage),

    RequestExecute(ErrorUri, ErrorMessage),

    Response(ErrorUri, ErrorMessage),
    Forbidden(ErrorUri),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
    ErrorResponseWithJson(ErrorUri, StatusCode, ErrorResponse),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => write!(f, "Issue creating request for URI: {}, error: {}", uri, msg),
            Error::RequestBuildHttpsCert(path, msg) => {
                write!(f, "Cannot use HTTPS trust anchor '{}'. Error: {}", path, msg)
            }

            Error::RequestExecute(uri, msg) => write!(f, "Issue accessing URI: {}, error: {}", uri, msg),

            Error::Response(uri, msg) => write!(f, "Issue processing response from URI: {}, error: {}", uri, msg),
            Error::Forbidden(uri) => write!(f, "Got 'Forbidden' response for URI: {}", uri),
            Error::ErrorResponseWithBody(uri, code, e) => {
                write!(f, "Error response from URI: {}, Status: {}, Error: {}", uri, code, e)
            }
            Error::ErrorResponseWithJson(uri, code, res) => write!(
                f,
                "Error response from URI: {}, Status: {}, ErrorResponse: {}",
                uri, code, res
            ),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn request_build_json(uri: &str, e: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), format!("could not serialize type to JSON: {}", e))
    }

    pub fn request_build_https_cert(path: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuildHttpsCert(path.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn forbidden(uri: &str) -> Self {
        Error::Forbidden(uri.to_string())
    }

    pub fn unexpected_status(status: StatusCode) -> String {
        format!("unexpected status code {}", status)
    }

    async fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text().await {
            Ok(body) => {
                if body.is_empty() {
                    Error::ErrorResponseWithBody(uri.to_string(), status, Self::unexpected_status(status))
                } else {
                    match serde_json::from_str::<ErrorResponse>(&body) {
                        Ok(res) => Error::ErrorResponseWithJson(uri.to_string(), status, res),
                        Err(_) => Error::ErrorResponseWithBody(uri.to_string(), status, body),
                    }
                }
            }
            _ => Error::Response(uri.to_string(), Self::unexpected_status(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn anchored_client_needs_https() {
        let pki = test::TestPki::generate();
        let anchor = || reqwest::Certificate::from_der(&pki.root.to_der().unwrap()).unwrap();
        let timeout = Duration::from_secs(1);

        for uri in ["http://ca.example.com/sign", "ca.example.com/sign", ""] {
            let err = anchored_client(uri, anchor(), None, timeout).unwrap_err();
            assert!(matches!(err, Error::RequestBuild(..)), "{}", uri);
        }
        assert!(anchored_client("HTTPS://ca.example.com/sign", anchor(), None, timeout).is_ok());
        assert!(anchored_client("https://ca.example.com/sign", anchor(), None, timeout).is_ok());
    }
}

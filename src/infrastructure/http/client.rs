use anyhow::{Context, Result};
use axum::http::request::Builder;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorResponse;

/// HTTP client for a [`TestServer`](super::TestServer).
///
/// A client made with [`with_bearer`](Self::with_bearer) sends the token on
/// every request; the original stays anonymous.
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    bearer: Option<String>,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.bearer.is_some())
            .finish_non_exhaustive()
    }
}

impl TestClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: None,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A copy of this client that authenticates with `token`
    pub fn with_bearer(&self, token: &str) -> Self {
        Self {
            bearer: Some(token.to_string()),
            ..self.clone()
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(Method::GET, path, &[]).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        let payload = serde_json::to_vec(body).context("failed to encode request body")?;
        let request = self
            .builder(Method::POST, path, &[])
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))?;
        self.dispatch(request).await
    }

    /// Body-less request with extra headers. An explicit `authorization`
    /// header replaces the client's bearer token.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<ApiResponse> {
        let request = self
            .builder(method, path, headers)
            .body(Full::new(Bytes::new()))?;
        self.dispatch(request).await
    }

    fn builder(&self, method: Method, path: &str, headers: &[(&str, &str)]) -> Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path));

        let explicit_auth = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        if let (Some(token), false) = (&self.bearer, explicit_auth) {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder
    }

    async fn dispatch(&self, request: Request<Full<Bytes>>) -> Result<ApiResponse> {
        let target = format!("{} {}", request.method(), request.uri());
        let response = self
            .client
            .request(request)
            .await
            .with_context(|| format!("{} failed", target))?;

        ApiResponse::read(response).await
    }
}

/// A fully read response with assertion helpers
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Parsed body, when it is JSON
    pub body: Option<Value>,
    pub bytes: Bytes,
}

impl ApiResponse {
    async fn read(response: Response<Incoming>) -> Result<Self> {
        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .context("failed to read response body")?
            .to_bytes();
        let body = serde_json::from_slice(&bytes).ok();

        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
            bytes,
        })
    }

    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {}. Body: {:?}",
            expected, self.status, self.body
        );
        self
    }

    pub fn assert_success(&self) -> &Self {
        assert!(
            self.status.is_success(),
            "Expected success status but got {}. Body: {:?}",
            self.status,
            self.body
        );
        self
    }

    /// The body decoded as the crate's [`ErrorResponse`]
    pub fn error(&self) -> Result<ErrorResponse> {
        self.json()
            .with_context(|| format!("not an error response: {:?}", self.body))
    }

    pub fn assert_error_message(&self, expected: &str) -> &Self {
        let error = self.error().unwrap_or_else(|err| panic!("{:#}", err));
        assert!(
            error.message.contains(expected),
            "Expected error message to contain '{}', but got '{}'",
            expected,
            error.message
        );
        self
    }

    /// Assert the value at a JSON pointer (`/database`, `/items/0/id`)
    pub fn assert_json_field(&self, pointer: &str, expected: Value) -> &Self {
        let actual = self
            .body
            .as_ref()
            .and_then(|b| b.pointer(pointer))
            .unwrap_or_else(|| panic!("Field '{}' not found in body: {:?}", pointer, self.body));
        assert_eq!(actual, &expected, "Field '{}' value mismatch", pointer);
        self
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    pub fn text(&self) -> Result<String> {
        Ok(std::str::from_utf8(&self.bytes)?.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        let actual = self
            .header(name)
            .unwrap_or_else(|| panic!("Header '{}' not found", name));
        assert_eq!(actual, expected, "Header '{}' value mismatch", name);
        self
    }

    pub fn assert_header_exists(&self, name: &str) -> &Self {
        assert!(self.headers.contains_key(name), "Header '{}' not found", name);
        self
    }
}

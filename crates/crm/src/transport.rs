use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// A provider API call relative to the provider base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: HttpMethod::Get, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: HttpMethod::Post, path: path.into(), query: Vec::new(), body: Some(body) }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self { method: HttpMethod::Patch, path: path.into(), query: Vec::new(), body: Some(body) }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self { method: HttpMethod::Delete, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request url `{0}`")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body could not be read: {0}")]
    Body(String),
}

/// Sends one authenticated request. Status codes are returned, not raised.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(
        &self,
        base_url: &str,
        bearer_token: &str,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError>;
}

pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(
        &self,
        base_url: &str,
        bearer_token: &str,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        let raw_url = join_url(base_url, &request.path);
        let parsed = if request.query.is_empty() {
            reqwest::Url::parse(&raw_url)
        } else {
            reqwest::Url::parse_with_params(&raw_url, &request.query)
        };
        let url = parsed.map_err(|_| TransportError::InvalidUrl(raw_url.clone()))?;

        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url),
            HttpMethod::Patch => self.http.patch(url),
            HttpMethod::Delete => self.http.delete(url),
        }
        .bearer_auth(bearer_token)
        .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response =
            builder.send().await.map_err(|error| TransportError::Request(error.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|error| TransportError::Body(error.to_string()))?;

        Ok(ApiResponse::new(status, decode_body(&text)))
    }
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Percent-encodes one path segment so ids cannot reach sibling resources.
pub(crate) fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(char::from(byte))
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Empty bodies (204) become `None`; non-JSON text is kept as a JSON string.
pub(crate) fn decode_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned())))
}

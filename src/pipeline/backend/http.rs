use crate::common::Frame;
use crate::error::BackendError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

const BODY_EXCERPT_CHARS: usize = 200;

// google.rpc.Code values worth retrying
const RPC_PERMISSION_DENIED: i32 = 7;
const RPC_RESOURCE_EXHAUSTED: i32 = 8;
const RPC_UNAVAILABLE: i32 = 14;

/// How requests authenticate: an API key query parameter, an OAuth bearer token, or both.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
}

impl Credentials {
    pub(crate) fn apply(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

/// Error payload embedded in Google API responses and operations.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct RpcStatus {
    pub code: i32,
    pub message: String,
}

impl RpcStatus {
    pub(crate) fn into_error(self) -> BackendError {
        let detail = format!("rpc code {}: {}", self.code, self.message);
        match self.code {
            RPC_PERMISSION_DENIED | RPC_RESOURCE_EXHAUSTED | RPC_UNAVAILABLE => {
                BackendError::Transient(detail)
            }
            _ => BackendError::Permanent(detail),
        }
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Permanent(format!("failed to build HTTP client: {e}")))
}

pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(classify_status(status, &body));
    }
    parse_body(&body)
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| {
        BackendError::Malformed(format!("{e} in response '{}'", excerpt(body)))
    })
}

/// Permission and quota rejections are retryable, everything else is final.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("HTTP {status}: {}", excerpt(body));
    match status {
        StatusCode::FORBIDDEN
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::SERVICE_UNAVAILABLE => BackendError::Transient(detail),
        _ => BackendError::Permanent(detail),
    }
}

fn transport_error(error: reqwest::Error) -> BackendError {
    if error.is_decode() {
        BackendError::Malformed(error.to_string())
    } else if error.is_timeout() || error.is_connect() {
        BackendError::Transient(error.to_string())
    } else {
        BackendError::Permanent(error.to_string())
    }
}

/// JPEG-encodes a frame and returns it base64-encoded for inline JSON payloads.
pub(crate) fn encode_jpeg_base64(image: &DynamicImage) -> Result<String, BackendError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| BackendError::Permanent(format!("failed to encode frame as JPEG: {e}")))?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

/// Encodes off the async workers; JPEG compression is CPU bound.
pub(crate) async fn encode_frame(frame: &Frame) -> Result<String, BackendError> {
    let frame = frame.clone();
    tokio::task::spawn_blocking(move || encode_jpeg_base64(frame.image()))
        .await
        .map_err(|e| BackendError::Permanent(format!("frame encoding task failed: {e}")))?
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
    format!("{cut}...")
}

//! Source clients and shared HTTP utilities for upstream APIs.

use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::HeaderValue;
use tracing::warn;

use crate::error::FdaError;

pub(crate) mod ollama;
pub(crate) mod openfda;

const ERROR_BODY_MAX_CHARS: usize = 300;
pub(crate) const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();

/// Returns a shared blocking HTTP client.
///
/// No retry middleware: callers own their retry policy. Request timeouts are set
/// per request; the client only bounds connection setup.
///
/// Must be called off the async runtime (e.g. inside `spawn_blocking`).
pub(crate) fn shared_client() -> Result<reqwest::blocking::Client, FdaError> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("fda-events/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FdaError::HttpClientInit)?;

    Ok(HTTP_CLIENT.get_or_init(|| client).clone())
}

/// First characters of an error body, flattened onto one line.
pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);
    let flat = full.trim().replace(['\n', '\r', '\t'], " ");

    if flat.chars().count() <= ERROR_BODY_MAX_CHARS {
        return flat;
    }
    let mut s: String = flat.chars().take(ERROR_BODY_MAX_CHARS - 1).collect();
    s.push('…');
    s
}

/// Reads at most `DEFAULT_MAX_BODY_BYTES`. A failure mid-body (timeout, reset,
/// truncation) is a transport error, not a parse error.
pub(crate) fn read_limited_body(
    resp: reqwest::blocking::Response,
    api: &str,
) -> Result<Vec<u8>, FdaError> {
    let mut body: Vec<u8> = Vec::new();
    resp.take(DEFAULT_MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|err| FdaError::transport(api, err))?;

    if body.len() as u64 > DEFAULT_MAX_BODY_BYTES {
        return Err(FdaError::parse(
            api,
            format!("response body exceeded {DEFAULT_MAX_BODY_BYTES} bytes"),
        ));
    }
    Ok(body)
}

pub(crate) fn ensure_json_content_type(
    api: &str,
    content_type: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), FdaError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };

    let raw = match content_type.to_str() {
        Ok(v) => v.trim(),
        Err(_) => {
            warn!(
                source = api,
                "Response content-type header was not valid UTF-8; attempting JSON parse"
            );
            return Ok(());
        }
    };
    if raw.is_empty() {
        return Ok(());
    }

    let media_type = raw
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();
    if matches!(media_type.as_str(), "text/html" | "application/xhtml+xml") {
        return Err(FdaError::parse(
            api,
            format!(
                "unexpected HTML response (content-type: {raw}): {}",
                body_excerpt(body)
            ),
        ));
    }

    let is_json = media_type == "application/json"
        || media_type == "text/json"
        || media_type.ends_with("+json");
    if !is_json {
        warn!(
            source = api,
            content_type = raw,
            "Unexpected non-JSON content type; attempting JSON parse for compatibility"
        );
    }

    Ok(())
}

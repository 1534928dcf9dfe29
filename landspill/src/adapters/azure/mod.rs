// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Azure Batch and Blob Storage over their REST APIs, authenticated with
//! the account keys held in the encrypted credential.

pub mod auth;
pub mod batch;
pub mod blob;
pub mod error;

pub use batch::AzureBatchClient;
pub use blob::AzureBlobClient;
pub use error::{AzureError, map_azure_error};

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, Url};
use time::OffsetDateTime;

use auth::{RequestParts, SharedKey, http_date};
use error::service_error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> Result<reqwest::Client, AzureError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("landspill/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| AzureError::Transport {
            url: String::new(),
            source,
        })
}

pub(crate) fn parse_endpoint(raw: &str) -> Result<Url, AzureError> {
    let url = Url::parse(raw.trim()).map_err(|err| AzureError::Url(format!("{raw}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(AzureError::Url(raw.to_string()));
    }
    Ok(url)
}

/// Appends path segments to `base`, percent-encoding each of them.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, AzureError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| AzureError::Url(base.to_string()))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// HTTP client that signs every request with a Shared Key.
pub(crate) struct SignedClient {
    http: reqwest::Client,
    key: SharedKey,
    date_header: &'static str,
    fixed_headers: Vec<(&'static str, String)>,
}

pub(crate) struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

impl SignedClient {
    pub(crate) fn new(
        key: SharedKey,
        date_header: &'static str,
        fixed_headers: Vec<(&'static str, String)>,
    ) -> Result<Self, AzureError> {
        Ok(Self {
            http: http_client()?,
            key,
            date_header,
            fixed_headers,
        })
    }

    pub(crate) fn key(&self) -> &SharedKey {
        &self.key
    }

    /// Sends the request and turns any non-2xx answer into `AzureError::Service`.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: Url,
        extra_headers: &[(&'static str, String)],
        payload: Option<Payload>,
    ) -> Result<Response, AzureError> {
        let mut headers = self.fixed_headers.clone();
        headers.push((self.date_header, http_date(OffsetDateTime::now_utc())?));
        headers.extend_from_slice(extra_headers);

        let (bytes, content_type) = match payload {
            Some(payload) => (payload.bytes, Some(payload.content_type)),
            None => (Vec::new(), None),
        };
        let authorization = self.key.authorization(&RequestParts {
            method: &method,
            url: &url,
            content_length: bytes.len(),
            content_type,
            headers: &headers,
        })?;

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, authorization);
        for (name, value) in &headers {
            request = request.header(*name, value);
        }
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if method != Method::GET && method != Method::HEAD {
            request = request.body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|source| AzureError::Transport {
                url: url.path().to_string(),
                source,
            })?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let header_code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(service_error(status, header_code, &body))
    }
}

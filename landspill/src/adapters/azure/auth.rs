// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Shared Key request signing for the Batch and Blob REST APIs, plus the
//! service SAS used to hand a container to Batch tasks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::{Method, Url};
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use zeroize::Zeroizing;

use super::error::AzureError;

type HmacSha256 = Hmac<Sha256>;

pub const BLOB_API_VERSION: &str = "2021-08-06";
pub const SAS_PERMISSIONS: &str = "rwdl";

const RFC1123: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);
const SAS_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Date header value (`x-ms-date` / `ocp-date`). `when` must be UTC.
pub fn http_date(when: OffsetDateTime) -> Result<String, AzureError> {
    when.format(RFC1123)
        .map_err(|err| AzureError::Signing(err.to_string()))
}

pub struct SharedKey {
    account: String,
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SharedKey {
    pub fn new(account: &str, base64_key: &str) -> Result<Self, AzureError> {
        let key = STANDARD
            .decode(base64_key.trim())
            .map_err(|err| AzureError::InvalidKey(format!("{account}: {err}")))?;
        Ok(Self {
            account: account.to_string(),
            key: Zeroizing::new(key),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn sign(&self, string_to_sign: &str) -> Result<String, AzureError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|err| AzureError::InvalidKey(err.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// `Authorization` header value for a request described by `parts`.
    pub fn authorization(&self, parts: &RequestParts<'_>) -> Result<String, AzureError> {
        let signature = self.sign(&parts.string_to_sign(&self.account))?;
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Container URL with a service SAS granting `rwdl` over HTTPS.
    pub fn container_sas_url(
        &self,
        endpoint: &Url,
        container: &str,
        start: OffsetDateTime,
        expiry: OffsetDateTime,
    ) -> Result<Url, AzureError> {
        let st = start
            .format(SAS_TIME)
            .map_err(|err| AzureError::Signing(err.to_string()))?;
        let se = expiry
            .format(SAS_TIME)
            .map_err(|err| AzureError::Signing(err.to_string()))?;
        let resource = format!("/blob/{}/{}", self.account, container);
        let fields = [
            SAS_PERMISSIONS,
            &st,
            &se,
            &resource,
            "",
            "",
            "https",
            BLOB_API_VERSION,
            "c",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ];
        let signature = self.sign(&fields.join("\n"))?;

        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AzureError::Url(endpoint.to_string()))?
            .pop_if_empty()
            .push(container);
        url.query_pairs_mut()
            .append_pair("sv", BLOB_API_VERSION)
            .append_pair("st", &st)
            .append_pair("se", &se)
            .append_pair("sr", "c")
            .append_pair("sp", SAS_PERMISSIONS)
            .append_pair("spr", "https")
            .append_pair("sig", &signature);
        Ok(url)
    }
}

/// The parts of a request that go into a Shared Key signature.
pub struct RequestParts<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub content_length: usize,
    pub content_type: Option<&'a str>,
    /// Service headers (`x-ms-*` for Blob, `ocp-*` for Batch).
    pub headers: &'a [(&'a str, String)],
}

impl RequestParts<'_> {
    pub fn string_to_sign(&self, account: &str) -> String {
        let content_length = if self.content_length == 0 {
            String::new()
        } else {
            self.content_length.to_string()
        };
        let mut out = format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n",
            self.method.as_str(),
            content_length,
            self.content_type.unwrap_or_default()
        );
        out.push_str(&canonical_headers(self.headers));
        out.push_str(&canonical_resource(account, self.url));
        out
    }
}

fn canonical_headers(headers: &[(&str, String)]) -> String {
    let mut sorted: Vec<(String, &str)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    sorted.sort();
    sorted
        .into_iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect()
}

fn canonical_resource(account: &str, url: &Url) -> String {
    let mut out = format!("/{account}{}", url.path());
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.into_owned()))
        .collect();
    params.sort();

    let mut current: Option<String> = None;
    for (name, value) in params {
        if current.as_deref() == Some(name.as_str()) {
            out.push(',');
            out.push_str(&value);
        } else {
            out.push('\n');
            out.push_str(&name);
            out.push(':');
            out.push_str(&value);
            current = Some(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const KEY: &str = "bGFuZHNwaWxsLXRlc3QtYWNjb3VudC1rZXktMDEyMzQ1Njc4OQ==";

    fn blob_headers() -> Vec<(&'static str, String)> {
        vec![
            ("x-ms-version", BLOB_API_VERSION.to_string()),
            ("x-ms-date", "Sun, 01 Mar 2026 12:00:00 GMT".to_string()),
        ]
    }

    #[test]
    fn formats_rfc1123_dates() {
        assert_eq!(
            http_date(datetime!(2026-03-01 12:00 UTC)).unwrap(),
            "Sun, 01 Mar 2026 12:00:00 GMT"
        );
    }

    #[test]
    fn builds_blob_string_to_sign() {
        let url = Url::parse(
            "https://acct.blob.core.windows.net/gulf-container?restype=container&comp=list&prefix=c1/",
        )
        .unwrap();
        let headers = blob_headers();
        let parts = RequestParts {
            method: &Method::GET,
            url: &url,
            content_length: 0,
            content_type: None,
            headers: &headers,
        };
        assert_eq!(
            parts.string_to_sign("acct"),
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Sun, 01 Mar 2026 12:00:00 GMT\n\
             x-ms-version:2021-08-06\n\
             /acct/gulf-container\ncomp:list\nprefix:c1/\nrestype:container"
        );
    }

    #[test]
    fn signs_with_decoded_key() {
        let url = Url::parse(
            "https://acct.blob.core.windows.net/gulf-container?restype=container&comp=list&prefix=c1/",
        )
        .unwrap();
        let headers = blob_headers();
        let parts = RequestParts {
            method: &Method::GET,
            url: &url,
            content_length: 0,
            content_type: None,
            headers: &headers,
        };
        let key = SharedKey::new("acct", KEY).unwrap();
        assert_eq!(
            key.authorization(&parts).unwrap(),
            "SharedKey acct:881yNd1yUGplwhNM6CYk5dRTJT/L0zgX9Kh9XIbvkAw="
        );
    }

    #[test]
    fn content_length_and_type_are_signed() {
        let url = Url::parse("https://acct.batch.azure.com/pools?api-version=1").unwrap();
        let headers = vec![("ocp-date", "d".to_string())];
        let parts = RequestParts {
            method: &Method::POST,
            url: &url,
            content_length: 42,
            content_type: Some("application/json"),
            headers: &headers,
        };
        assert_eq!(
            parts.string_to_sign("acct"),
            "POST\n\n\n42\n\napplication/json\n\n\n\n\n\n\nocp-date:d\n/acct/pools\napi-version:1"
        );
    }

    #[test]
    fn container_sas_url_is_signed() {
        let key = SharedKey::new("acct", KEY).unwrap();
        let endpoint = Url::parse("https://acct.blob.core.windows.net").unwrap();
        let url = key
            .container_sas_url(
                &endpoint,
                "gulf-container",
                datetime!(2026-03-01 12:00 UTC),
                datetime!(2026-03-31 12:00 UTC),
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/gulf-container\
             ?sv=2021-08-06&st=2026-03-01T12%3A00%3A00Z&se=2026-03-31T12%3A00%3A00Z\
             &sr=c&sp=rwdl&spr=https&sig=LduKrcVPOJYAjqKlPeuRqToSsPvSgh5L4nq5X7F7%2FXc%3D"
        );
    }

    #[test]
    fn rejects_non_base64_key() {
        let err = SharedKey::new("acct", "not base64!").unwrap_err();
        assert!(matches!(err, AzureError::InvalidKey(_)));
    }
}

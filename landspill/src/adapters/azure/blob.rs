// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use time::OffsetDateTime;

use super::auth::{BLOB_API_VERSION, SharedKey};
use super::error::{AzureError, map_azure_error};
use super::{Payload, SignedClient, join_segments, parse_endpoint};
use crate::app::errors::AppResult;
use crate::app::ports::BlobStoragePort;
use crate::app::types::{BlobItem, ContainerCreation, Credential};

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: BlobProperties,
}

#[derive(Debug, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: u64,
}

fn parse_listing(xml: &str) -> Result<(Vec<BlobItem>, Option<String>), AzureError> {
    let results: EnumerationResults =
        quick_xml::de::from_str(xml).map_err(|err| AzureError::Decode(err.to_string()))?;
    let items = results
        .blobs
        .items
        .into_iter()
        .map(|entry| BlobItem {
            name: entry.name,
            size: entry.properties.content_length,
        })
        .collect();
    let marker = results.next_marker.filter(|marker| !marker.is_empty());
    Ok((items, marker))
}

pub struct AzureBlobClient {
    client: SignedClient,
    endpoint: Url,
}

impl AzureBlobClient {
    /// Client for `https://<storage account>.blob.core.windows.net`.
    pub fn new(credential: &Credential) -> AppResult<Self> {
        let endpoint = format!(
            "https://{}.blob.core.windows.net",
            credential.storage_account_name.trim()
        );
        Self::with_endpoint(credential, &endpoint)
    }

    /// Client for a custom endpoint such as a local storage emulator.
    pub fn with_endpoint(credential: &Credential, endpoint: &str) -> AppResult<Self> {
        credential.ensure_complete()?;
        Self::build(credential, endpoint).map_err(map_azure_error)
    }

    fn build(credential: &Credential, endpoint: &str) -> Result<Self, AzureError> {
        let key = SharedKey::new(
            &credential.storage_account_name,
            &credential.storage_account_key,
        )?;
        Ok(Self {
            client: SignedClient::new(
                key,
                "x-ms-date",
                vec![("x-ms-version", BLOB_API_VERSION.to_string())],
            )?,
            endpoint: parse_endpoint(endpoint)?,
        })
    }

    fn container_url(&self, container: &str) -> Result<Url, AzureError> {
        let mut url = join_segments(&self.endpoint, [container])?;
        url.query_pairs_mut().append_pair("restype", "container");
        Ok(url)
    }

    fn blob_url(&self, container: &str, blob_name: &str) -> Result<Url, AzureError> {
        join_segments(
            &self.endpoint,
            std::iter::once(container).chain(blob_name.split('/')),
        )
    }

    async fn list_page(
        &self,
        container: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<(Vec<BlobItem>, Option<String>), AzureError> {
        let mut url = self.container_url(container)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("comp", "list");
            if let Some(prefix) = prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        let response = self.client.send(Method::GET, url, &[], None).await?;
        let body = response
            .text()
            .await
            .map_err(|err| AzureError::Decode(err.to_string()))?;
        parse_listing(&body)
    }

    async fn delete(&self, url: Url) -> Result<bool, AzureError> {
        match self.client.send(Method::DELETE, url, &[], None).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl BlobStoragePort for AzureBlobClient {
    #[tracing::instrument(skip(self))]
    async fn create_container(&self, container: &str) -> AppResult<ContainerCreation> {
        let url = self.container_url(container).map_err(map_azure_error)?;
        let empty = Payload {
            bytes: Vec::new(),
            content_type: "application/octet-stream",
        };
        match self.client.send(Method::PUT, url, &[], Some(empty)).await {
            Ok(_) => Ok(ContainerCreation::Created),
            Err(err) => match err.service_code() {
                Some("ContainerAlreadyExists") => Ok(ContainerCreation::AlreadyExists),
                Some("ContainerBeingDeleted") => Ok(ContainerCreation::BeingDeleted),
                _ => Err(map_azure_error(err)),
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn container_exists(&self, container: &str) -> AppResult<bool> {
        let url = self.container_url(container).map_err(map_azure_error)?;
        match self.client.send(Method::GET, url, &[], None).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(map_azure_error(err)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_container(&self, container: &str) -> AppResult<bool> {
        let url = self.container_url(container).map_err(map_azure_error)?;
        self.delete(url).await.map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn upload_file(
        &self,
        container: &str,
        blob_name: &str,
        local_path: &Path,
    ) -> AppResult<()> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| AzureError::File {
                path: local_path.display().to_string(),
                source,
            })
            .map_err(map_azure_error)?;
        let size = bytes.len();
        let url = self.blob_url(container, blob_name).map_err(map_azure_error)?;
        self.client
            .send(
                Method::PUT,
                url,
                &[("x-ms-blob-type", "BlockBlob".to_string())],
                Some(Payload {
                    bytes,
                    content_type: "application/octet-stream",
                }),
            )
            .await
            .map_err(map_azure_error)?;
        tracing::debug!(bytes = size, "uploaded blob");
        Ok(())
    }

    #[tracing::instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn download_file(
        &self,
        container: &str,
        blob_name: &str,
        local_path: &Path,
    ) -> AppResult<()> {
        let url = self.blob_url(container, blob_name).map_err(map_azure_error)?;
        let response = self
            .client
            .send(Method::GET, url, &[], None)
            .await
            .map_err(map_azure_error)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| AzureError::Transport {
                url: blob_name.to_string(),
                source,
            })
            .map_err(map_azure_error)?;

        let file_error = |source| {
            map_azure_error(AzureError::File {
                path: local_path.display().to_string(),
                source,
            })
        };
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(file_error)?;
        }
        tokio::fs::write(local_path, &bytes)
            .await
            .map_err(file_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> AppResult<Vec<BlobItem>> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let (page, next) = self
                .list_page(container, prefix, marker.as_deref())
                .await
                .map_err(map_azure_error)?;
            blobs.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(blobs)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_blob(&self, container: &str, blob_name: &str) -> AppResult<bool> {
        let url = self.blob_url(container, blob_name).map_err(map_azure_error)?;
        self.delete(url).await.map_err(map_azure_error)
    }

    fn container_sas_url(
        &self,
        container: &str,
        start: OffsetDateTime,
        expiry: OffsetDateTime,
    ) -> AppResult<String> {
        self.client
            .key()
            .container_sas_url(&self.endpoint, container, start, expiry)
            .map(String::from)
            .map_err(map_azure_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://store.blob.core.windows.net/" ContainerName="gulf-container">
  <Prefix>c1/</Prefix>
  <Blobs>
    <Blob>
      <Name>c1/setrun.py</Name>
      <Properties>
        <Last-Modified>Sun, 01 Mar 2026 12:00:00 GMT</Last-Modified>
        <Content-Length>1024</Content-Length>
        <BlobType>BlockBlob</BlobType>
      </Properties>
    </Blob>
    <Blob>
      <Name>c1/_output/fort.q0001</Name>
      <Properties>
        <Content-Length>77</Content-Length>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker>2!84!MDAwMDE</NextMarker>
</EnumerationResults>"#;

    fn credential() -> Credential {
        Credential {
            batch_account_name: "acct".to_string(),
            batch_account_key: "a2V5".to_string(),
            batch_account_url: "https://acct.eastus.batch.azure.com".to_string(),
            storage_account_name: "store".to_string(),
            storage_account_key: "a2V5".to_string(),
        }
    }

    #[test]
    fn parses_blob_listing() {
        let (items, marker) = parse_listing(LISTING).unwrap();
        assert_eq!(
            items,
            vec![
                BlobItem {
                    name: "c1/setrun.py".to_string(),
                    size: 1024
                },
                BlobItem {
                    name: "c1/_output/fort.q0001".to_string(),
                    size: 77
                },
            ]
        );
        assert_eq!(marker.as_deref(), Some("2!84!MDAwMDE"));
    }

    #[test]
    fn empty_listing_has_no_marker() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults ContainerName="c"><Blobs /><NextMarker /></EnumerationResults>"#;
        let (items, marker) = parse_listing(xml).unwrap();
        assert!(items.is_empty());
        assert_eq!(marker, None);
    }

    #[test]
    fn blob_names_become_path_segments() {
        let client = AzureBlobClient::new(&credential()).unwrap();
        let url = client.blob_url("gulf-container", "c1/_output/fort.q0001").unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.blob.core.windows.net/gulf-container/c1/_output/fort.q0001"
        );
        assert_eq!(
            client.container_url("gulf-container").unwrap().as_str(),
            "https://store.blob.core.windows.net/gulf-container?restype=container"
        );
    }

    #[test]
    fn sas_url_targets_the_container() {
        let client = AzureBlobClient::new(&credential()).unwrap();
        let url = client
            .container_sas_url(
                "gulf-container",
                datetime!(2026-03-01 12:00 UTC),
                datetime!(2026-03-31 12:00 UTC),
            )
            .unwrap();
        assert!(url.starts_with("https://store.blob.core.windows.net/gulf-container?sv=2021-08-06&"));
        assert!(url.contains("&sp=rwdl&"));
        assert!(url.contains("&sig="));
    }
}

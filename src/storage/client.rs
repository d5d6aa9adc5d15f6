use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, StatusCode, Url};

use super::credentials::{SignableRequest, StorageCredentials};
use super::uri::BlobUri;
use super::BlobStorage;
use crate::http::{send_with_retry, HttpError};
use crate::retry::RetryConfig;

/// Blob service REST API version used for all requests.
const STORAGE_API_VERSION: &str = "2021-08-06";

/// Blob service client over the REST API
pub struct BlobServiceClient {
    client: Client,
    retry: RetryConfig,
}

impl BlobServiceClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vhd2vm/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            retry: RetryConfig::default(),
        })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: Vec<(&'static str, String)>,
        body: Option<Bytes>,
        credentials: &StorageCredentials,
    ) -> Result<reqwest::Response, HttpError> {
        send_with_retry(&self.retry, || {
            let mut url = url.clone();
            credentials.apply_to_url(&mut url);

            let mut ms_headers = headers.clone();
            ms_headers.push(("x-ms-date", rfc1123_now()));
            ms_headers.push(("x-ms-version", STORAGE_API_VERSION.to_string()));

            let content_length = body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
            let content_type = if body.is_some() {
                "application/octet-stream"
            } else {
                ""
            };

            let authorization = credentials
                .authorization(&SignableRequest {
                    method: method.as_str(),
                    url: &url,
                    content_length,
                    content_type,
                    ms_headers: &ms_headers,
                })
                .map_err(|e| HttpError::Build(e.to_string()))?;

            let mut request = self.client.request(method.clone(), url);
            for (name, value) in &ms_headers {
                request = request.header(*name, value);
            }
            if let Some(auth) = authorization {
                request = request.header("Authorization", auth);
            }
            request = match &body {
                Some(data) => request
                    .header("Content-Type", content_type)
                    .body(data.clone()),
                None => request.header("Content-Length", "0"),
            };
            Ok(request)
        })
        .await
    }
}

#[async_trait]
impl BlobStorage for BlobServiceClient {
    async fn list_containers(
        &self,
        base_uri: &str,
        credentials: &StorageCredentials,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = Url::parse(base_uri)
                .with_context(|| format!("Invalid blob endpoint '{}'", base_uri))?;
            url.query_pairs_mut().append_pair("comp", "list");
            if let Some(m) = &marker {
                url.query_pairs_mut().append_pair("marker", m);
            }

            let body = self
                .send(Method::GET, url, Vec::new(), None, credentials)
                .await
                .with_context(|| format!("Failed to list containers at {}", base_uri))?
                .text()
                .await?;

            names.extend(extract_container_names(&body));
            marker = extract_tag(&body, "NextMarker").filter(|m| !m.is_empty());
            if marker.is_none() {
                break;
            }
        }

        Ok(names)
    }

    async fn create_container_if_not_exists(
        &self,
        blob: &BlobUri,
        credentials: &StorageCredentials,
    ) -> Result<()> {
        let mut url = Url::parse(blob.base_uri())?;
        url.set_path(blob.container());
        url.query_pairs_mut().append_pair("restype", "container");

        match self
            .send(Method::PUT, url, Vec::new(), None, credentials)
            .await
        {
            Ok(_) => {
                tracing::debug!(container = blob.container(), "container created");
                Ok(())
            }
            Err(e) if e.status() == Some(StatusCode::CONFLICT) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to create container '{}'", blob.container()))),
        }
    }

    async fn page_blob_exists(
        &self,
        blob: &BlobUri,
        credentials: &StorageCredentials,
    ) -> Result<bool> {
        let url = Url::parse(&blob.without_query())?;
        match self
            .send(Method::HEAD, url, Vec::new(), None, credentials)
            .await
        {
            Ok(response) => {
                let blob_type = response
                    .headers()
                    .get("x-ms-blob-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                Ok(blob_type.eq_ignore_ascii_case("PageBlob"))
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => {
                Err(anyhow::Error::new(e).context(format!("Failed to look up blob '{}'", blob)))
            }
        }
    }

    async fn create_page_blob(
        &self,
        blob: &BlobUri,
        size: u64,
        credentials: &StorageCredentials,
    ) -> Result<()> {
        let url = Url::parse(&blob.without_query())?;
        let headers = vec![
            ("x-ms-blob-type", "PageBlob".to_string()),
            ("x-ms-blob-content-length", size.to_string()),
        ];
        self.send(Method::PUT, url, headers, None, credentials)
            .await
            .with_context(|| format!("Failed to create page blob '{}'", blob))?;
        Ok(())
    }

    async fn put_page(
        &self,
        blob: &BlobUri,
        offset: u64,
        data: Bytes,
        credentials: &StorageCredentials,
    ) -> Result<()> {
        let mut url = Url::parse(&blob.without_query())?;
        url.query_pairs_mut().append_pair("comp", "page");
        let end = offset + data.len() as u64 - 1;
        let headers = vec![
            ("x-ms-page-write", "update".to_string()),
            ("x-ms-range", format!("bytes={}-{}", offset, end)),
        ];
        self.send(Method::PUT, url, headers, Some(data), credentials)
            .await
            .with_context(|| format!("Failed to write pages {}-{} of '{}'", offset, end, blob))?;
        Ok(())
    }
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Extract `<Name>` values inside `<Container>` elements of a List Containers response.
fn extract_container_names(body: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<Container>") {
        let after = &rest[start + "<Container>".len()..];
        let Some(end) = after.find("</Container>") else {
            break;
        };
        if let Some(name) = extract_tag(&after[..end], "Name") {
            names.push(name);
        }
        rest = &after[end + "</Container>".len()..];
    }
    names
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

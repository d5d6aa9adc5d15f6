// src/storage/uri.rs
use reqwest::Url;

/// A page blob URL split into the parts the Blob service addresses.
///
/// Accepts `https://<account>.blob.<suffix>/<container>/<blob...>[?sas]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUri {
    uri: Url,
    storage_account_name: String,
    base_uri: String,
    container: String,
    blob_name: String,
}

impl BlobUri {
    /// Parse a blob URL. Returns `None` when it does not name an account, container and blob.
    pub fn parse(input: &str) -> Option<Self> {
        let uri = Url::parse(input).ok()?;
        if !matches!(uri.scheme(), "http" | "https") {
            return None;
        }

        let host = uri.host_str()?;
        let (account, rest) = host.split_once('.')?;
        if account.is_empty() || rest.is_empty() {
            return None;
        }

        let path = uri.path().trim_start_matches('/');
        let (container, blob_name) = path.split_once('/')?;
        if container.is_empty() || blob_name.is_empty() {
            return None;
        }

        let base_uri = match uri.port() {
            Some(port) => format!("{}://{}:{}/", uri.scheme(), host, port),
            None => format!("{}://{}/", uri.scheme(), host),
        };

        Some(Self {
            storage_account_name: account.to_string(),
            base_uri,
            container: decode(container),
            blob_name: decode(blob_name),
            uri,
        })
    }

    /// Build the URL of a blob under a storage account's blob endpoint.
    pub fn under_endpoint(endpoint: &str, container: &str, blob_name: &str) -> Option<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        Self::parse(&format!("{}/{}/{}", endpoint, container, blob_name))
    }

    pub fn storage_account_name(&self) -> &str {
        &self.storage_account_name
    }

    /// Blob service endpoint, with trailing slash.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    /// SAS token carried in the query string, if any.
    pub fn sas_token(&self) -> Option<&str> {
        self.uri
            .query()
            .filter(|q| q.split('&').any(|kv| kv.starts_with("sig=")))
    }

    /// URL without any query string.
    pub fn without_query(&self) -> String {
        let mut uri = self.uri.clone();
        uri.set_query(None);
        uri.to_string()
    }
}

impl std::fmt::Display for BlobUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

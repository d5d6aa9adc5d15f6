// src/storage/credentials.rs
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use super::uri::BlobUri;

/// How requests to the Blob service are authorized.
#[derive(Clone)]
pub enum StorageCredentials {
    /// No authorization header; public containers only.
    Anonymous,
    /// Shared Key authorization with a storage account key.
    SharedKey { account: String, key: Vec<u8> },
    /// SAS token appended to every request URL.
    Sas { token: String },
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::SharedKey { account, .. } => write!(f, "SharedKey({})", account),
            Self::Sas { .. } => write!(f, "Sas"),
        }
    }
}

impl StorageCredentials {
    /// Shared Key credentials from a base64 account key as returned by listKeys.
    pub fn shared_key(account: &str, key: &str) -> Result<Self> {
        let key = BASE64_STANDARD
            .decode(key)
            .map_err(|e| {
                anyhow::anyhow!("Storage key for account '{}' is not valid base64: {}", account, e)
            })?;
        Ok(Self::SharedKey {
            account: account.to_string(),
            key,
        })
    }

    /// Credentials for a blob URL that does not need an account key.
    pub fn for_public_uri(blob: &BlobUri) -> Self {
        match blob.sas_token() {
            Some(token) => Self::Sas {
                token: token.to_string(),
            },
            None => Self::Anonymous,
        }
    }

    /// Appends the SAS token to `url` when using SAS authorization.
    pub fn apply_to_url(&self, url: &mut Url) {
        if let Self::Sas { token } = self {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, token),
                _ => token.clone(),
            };
            url.set_query(Some(&query));
        }
    }

    /// Shared Key `Authorization` header value, or `None` for other schemes.
    pub fn authorization(&self, request: &SignableRequest<'_>) -> Result<Option<String>> {
        let Self::SharedKey { account, key } = self else {
            return Ok(None);
        };

        let string_to_sign = request.string_to_sign(account);
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| anyhow::anyhow!("HMAC key error: {}", e))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(Some(format!("SharedKey {}:{}", account, signature)))
    }
}

/// True when writes to this blob need credentials built from the account keys.
///
/// URLs that carry their own SAS signature are self-authorizing.
pub fn is_channel_required(blob: &BlobUri) -> bool {
    blob.sas_token().is_none()
}

/// The parts of a Blob service request covered by a Shared Key signature.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    pub content_length: u64,
    pub content_type: &'a str,
    /// `x-ms-*` headers, including `x-ms-date` and `x-ms-version`.
    pub ms_headers: &'a [(&'a str, String)],
}

impl SignableRequest<'_> {
    /// ```text
    /// VERB\nContent-Encoding\nContent-Language\nContent-Length\nContent-MD5\n
    /// Content-Type\nDate\nIf-Modified-Since\nIf-Match\nIf-None-Match\n
    /// If-Unmodified-Since\nRange\nCanonicalizedHeaders\nCanonicalizedResource
    /// ```
    pub fn string_to_sign(&self, account: &str) -> String {
        let content_length = match self.content_length {
            0 => String::new(),
            len => len.to_string(),
        };

        let mut headers: Vec<(String, &str)> = self
            .ms_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonicalized_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let mut canonicalized_resource = format!("/{}{}", account, self.url.path());
        let mut params: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        params.sort();
        for (k, v) in params {
            canonicalized_resource.push_str(&format!("\n{}:{}", k, v));
        }

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
            self.method,
            content_length,
            self.content_type,
            canonicalized_headers,
            canonicalized_resource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(url: &str) -> BlobUri {
        BlobUri::parse(url).unwrap()
    }

    #[test]
    fn test_channel_required_without_sas() {
        assert!(is_channel_required(&blob(
            "https://acct.blob.core.windows.net/c/b.vhd"
        )));
        assert!(!is_channel_required(&blob(
            "https://acct.blob.core.windows.net/c/b.vhd?sv=1&sig=x"
        )));
    }

    #[test]
    fn test_for_public_uri_uses_sas() {
        let creds =
            StorageCredentials::for_public_uri(&blob("https://a.blob.core.windows.net/c/b?sig=x"));
        assert!(matches!(creds, StorageCredentials::Sas { ref token } if token == "sig=x"));

        let creds = StorageCredentials::for_public_uri(&blob("https://a.blob.core.windows.net/c/b"));
        assert!(matches!(creds, StorageCredentials::Anonymous));
    }

    #[test]
    fn test_apply_sas_to_url() {
        let creds = StorageCredentials::Sas {
            token: "sv=1&sig=x".to_string(),
        };
        let mut url = Url::parse("https://a.blob.core.windows.net/c/b?comp=page").unwrap();
        creds.apply_to_url(&mut url);
        assert_eq!(url.query(), Some("comp=page&sv=1&sig=x"));
    }

    #[test]
    fn test_string_to_sign_layout() {
        let url = Url::parse("https://acct.blob.core.windows.net/cnt/blb0.vhd?comp=page").unwrap();
        let headers = [
            ("x-ms-version", "2021-08-06".to_string()),
            ("x-ms-date", "Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
            ("x-ms-range", "bytes=0-511".to_string()),
        ];
        let request = SignableRequest {
            method: "PUT",
            url: &url,
            content_length: 512,
            content_type: "application/octet-stream",
            ms_headers: &headers,
        };
        assert_eq!(
            request.string_to_sign("acct"),
            "PUT\n\n\n512\n\napplication/octet-stream\n\n\n\n\n\n\n\
             x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
             x-ms-range:bytes=0-511\n\
             x-ms-version:2021-08-06\n\
             /acct/cnt/blb0.vhd\ncomp:page"
        );
    }

    #[test]
    fn test_shared_key_authorization_header() {
        let creds = StorageCredentials::shared_key("acct", "c2VjcmV0").unwrap();
        let url = Url::parse("https://acct.blob.core.windows.net/?comp=list").unwrap();
        let headers = [("x-ms-version", "2021-08-06".to_string())];
        let header = creds
            .authorization(&SignableRequest {
                method: "GET",
                url: &url,
                content_length: 0,
                content_type: "",
                ms_headers: &headers,
            })
            .unwrap()
            .unwrap();
        assert!(header.starts_with("SharedKey acct:"));

        let anonymous = StorageCredentials::Anonymous;
        let url = Url::parse("https://acct.blob.core.windows.net/").unwrap();
        assert!(anonymous
            .authorization(&SignableRequest {
                method: "GET",
                url: &url,
                content_length: 0,
                content_type: "",
                ms_headers: &[],
            })
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_shared_key_rejects_bad_key() {
        let err = StorageCredentials::shared_key("acct", "not base64!").unwrap_err();
        assert!(err.to_string().contains("'acct' is not valid base64"));
    }
}

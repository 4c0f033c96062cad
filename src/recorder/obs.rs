//! Object storage variant (OBS, S3-compatible v2 signatures)
//!
//! One signed `PUT` per archive. The object lands at `target` inside the
//! configured bucket; nothing is retried.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::{Client, Url};
use sha1::Sha1;
use tracing::{debug, error, info};

use super::{ReplayStorage, StorageError};
use crate::config::ObsConfig;
use crate::service::auth::http_date;

type HmacSha1 = Hmac<Sha1>;

const CONTENT_TYPE: &str = "application/octet-stream";

pub struct ObsReplayStorage {
    /// Bucket root: `<bucket>.<host>` when virtual-hosted, the bare endpoint otherwise
    base: Url,
    path_style: bool,
    bucket: String,
    access_key: String,
    secret_key: String,
    http: Client,
}

fn is_ip_host(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

impl ObsReplayStorage {
    /// A bare endpoint host means https. IP endpoints cannot carry a bucket
    /// subdomain and are always addressed path-style.
    pub fn new(config: &ObsConfig, timeout: Duration) -> Result<Self, StorageError> {
        let endpoint = config.endpoint.trim_end_matches('/');
        let invalid = |reason: &dyn std::fmt::Display| {
            StorageError::InvalidEndpoint(format!("{}: {}", config.endpoint, reason))
        };

        let mut base = if endpoint.contains("://") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!("https://{}", endpoint))
        }
        .map_err(|e| invalid(&e))?;

        let host = base
            .host_str()
            .ok_or_else(|| invalid(&"no host"))?
            .to_string();
        let path_style = config.path_style || is_ip_host(&host);
        if !path_style {
            base.set_host(Some(&format!("{}.{}", config.bucket, host)))
                .map_err(|e| invalid(&e))?;
        }
        if base.cannot_be_a_base() {
            return Err(invalid(&"not a base URL"));
        }
        debug!("OBS bucket {} at {} (path style: {})", config.bucket, base, path_style);

        Ok(Self {
            base,
            path_style,
            bucket: config.bucket.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            http: Client::builder().timeout(timeout).build()?,
        })
    }

    /// URL of `key` and the canonical resource signed for it
    ///
    /// Each key segment is percent-encoded once and the same encoded path is
    /// used on the wire and in the string-to-sign.
    fn object_url(&self, key: &str) -> Result<(Url, String), StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(self.path_style.then_some(self.bucket.as_str()))
            .extend(key.split('/'));

        let resource = if self.path_style {
            url.path().to_string()
        } else {
            format!("/{}{}", self.bucket, url.path())
        };
        Ok((url, resource))
    }

    fn authorization(&self, content_md5: &str, date: &str, resource: &str) -> Result<String, StorageError> {
        let string_to_sign = format!("PUT\n{}\n{}\n{}\n{}", content_md5, CONTENT_TYPE, date, resource);
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(format!(
            "OBS {}:{}",
            self.access_key,
            BASE64.encode(mac.finalize().into_bytes())
        ))
    }
}

fn content_md5(body: &[u8]) -> String {
    BASE64.encode(Md5::digest(body))
}

#[async_trait]
impl ReplayStorage for ObsReplayStorage {
    async fn upload(&self, archive: &Path, target: &str) -> Result<(), StorageError> {
        let key = target.trim_start_matches('/');
        let body = tokio::fs::read(archive).await?;
        let md5 = content_md5(&body);
        let date = http_date(chrono::Utc::now());
        let (url, resource) = self.object_url(key)?;
        let authorization = self.authorization(&md5, &date, &resource)?;
        let size = body.len();

        let response = self
            .http
            .put(url)
            .header("Content-MD5", md5)
            .header("Content-Type", CONTENT_TYPE)
            .header("Date", date)
            .header("Authorization", authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("OBS upload of {} failed with HTTP {}", key, status);
            return Err(StorageError::Obs {
                status: status.as_u16(),
                body,
            });
        }

        info!("Uploaded {:?} ({} bytes) to obs://{}/{}", archive, size, self.bucket, key);
        Ok(())
    }

    fn type_name(&self) -> &str {
        "obs"
    }
}

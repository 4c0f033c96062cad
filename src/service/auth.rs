//! Request signing for the control plane
//!
//! Node requests carry an HTTP Signature `Authorization` header: an
//! HMAC-SHA256 over the request target, `Accept` and `Date`, keyed by the
//! node's access key secret.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ServiceError;
use crate::model::AccessKey;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNED_HEADERS: &str = "(request-target) accept date";

/// RFC 7231 `Date` header value
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Signs requests with an [`AccessKey`]
#[derive(Debug, Clone)]
pub struct HttpSigner {
    key: AccessKey,
}

impl HttpSigner {
    pub fn new(key: AccessKey) -> Self {
        Self { key }
    }

    pub fn key_id(&self) -> &str {
        &self.key.id
    }

    /// `Authorization` header value for one request
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        accept: &str,
        date: &str,
    ) -> Result<String, ServiceError> {
        let signing_string = format!(
            "(request-target): {} {}\naccept: {}\ndate: {}",
            method.to_ascii_lowercase(),
            path,
            accept,
            date
        );

        let mut mac = HmacSha256::new_from_slice(self.key.secret.as_bytes())
            .map_err(|e| ServiceError::Signing(e.to_string()))?;
        mac.update(signing_string.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(format!(
            "Signature keyId=\"{}\",algorithm=\"hmac-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key.id, SIGNED_HEADERS, signature
        ))
    }
}

//! SharedKeyLite request signing for the table service.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use super::connection::ConnectionStringError;
use crate::{StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Signs table requests with an account's shared key.
#[derive(Clone)]
pub struct SharedKeyLite {
    account: String,
    key: Vec<u8>,
}

impl fmt::Debug for SharedKeyLite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyLite")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl SharedKeyLite {
    pub fn new(account: &str, key: &str) -> Result<Self, ConnectionStringError> {
        Ok(Self {
            account: account.to_string(),
            key: BASE64.decode(key)?,
        })
    }

    /// Value of the `x-ms-date` header for `now`.
    pub fn format_date(now: DateTime<Utc>) -> String {
        now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// The `Authorization` header for a request to `url` sent at `date`.
    pub fn authorization(&self, date: &str, url: &Url) -> StoreResult<String> {
        let string_to_sign = format!("{date}\n{}", self.canonicalized_resource(url));

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| StoreError::InvalidRequest(format!("unusable account key: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKeyLite {}:{signature}", self.account))
    }

    /// `/{account}{encoded path}`, plus `?comp=` when the request carries it.
    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account, url.path());
        if let Some((_, comp)) = url.query_pairs().find(|(k, _)| k == "comp") {
            resource.push_str("?comp=");
            resource.push_str(&comp);
        }
        resource
    }
}

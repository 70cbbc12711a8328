//! kv::consul
//!
//! Consul implementation of [`KvStore`] over the HTTP API.
//!
//! # Endpoints
//!
//! All calls go to `/v1/kv/<key>`:
//! - `GET ?recurse` lists a subtree with values
//! - `GET ?keys&separator=/` lists key names, collapsed at the separator
//! - `GET` reads one key
//! - `PUT ?cas=<index>` writes, answering `true` or `false`
//! - `DELETE ?cas=<index>` deletes, answering `true` or `false`
//!
//! Values travel base64-encoded in JSON responses and raw in PUT bodies.
//! A 404 on any read means "nothing there" and is not an error.
//!
//! # Error Mapping
//!
//! - connect failures, timeouts, 5xx and 429 -> `Unavailable`
//! - 401 and 403 -> `PermissionDenied`
//! - `false` from a guarded write -> `CasMismatch`
//! - any other status -> `ApiError`
//!
//! # Example
//!
//! ```ignore
//! use consulkv::kv::{consul::ConsulKv, KvStore};
//!
//! let store = ConsulKv::new(&env.connection)?;
//! let listing = store.list_under("prod/app/").await?;
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

use super::traits::{KvError, KvStore, Listing, RemoteEntry};
use crate::core::types::{Connection, ModifyIndex};

/// Header carrying the ACL token.
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Header carrying the store index of a read.
const INDEX_HEADER: &str = "X-Consul-Index";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = concat!("consulkv/", env!("CARGO_PKG_VERSION"));

/// Consul KV client.
///
/// One instance talks to one agent with one token; create one per
/// environment per invocation.
pub struct ConsulKv {
    client: Client,
    base: Url,
    token: Option<String>,
    datacenter: Option<String>,
}

// Custom Debug to avoid exposing the token
impl std::fmt::Debug for ConsulKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulKv")
            .field("base", &self.base.as_str())
            .field("has_token", &self.token.is_some())
            .field("datacenter", &self.datacenter)
            .finish()
    }
}

impl ConsulKv {
    /// Create a client for `connection`.
    ///
    /// Every request is bounded by `connection.timeout`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if the address is not a usable base URL,
    /// or `Unavailable` if the HTTP client cannot be built.
    pub fn new(connection: &Connection) -> Result<Self, KvError> {
        let base = Url::parse(&connection.address).map_err(|e| {
            KvError::InvalidResponse(format!("invalid address '{}': {}", connection.address, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(KvError::InvalidResponse(format!(
                "invalid address '{}': cannot be a base URL",
                connection.address
            )));
        }

        let client = Client::builder()
            .timeout(connection.timeout)
            .user_agent(USER_AGENT_VALUE)
            .build()
            .map_err(|e| KvError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            token: connection.token.clone(),
            datacenter: connection.datacenter.clone(),
        })
    }

    /// Get the base address.
    pub fn address(&self) -> &str {
        self.base.as_str()
    }

    /// Build the URL for a key, percent-encoding each segment.
    fn kv_url(&self, key: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("v1").push("kv");
            segments.extend(key.split('/'));
        }
        if let Some(dc) = &self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            // A token with non-visible ASCII goes unsent; Consul answers 403.
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert(TOKEN_HEADER, value);
            }
        }
        headers
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!(%method, path = url.path(), "consul request");
        self.client.request(method, url).headers(self.headers())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, KvError> {
        builder.send().await.map_err(map_transport_error)
    }

    /// Map a non-success response to an error.
    async fn error_from(response: Response) -> KvError {
        let status = response.status();
        let message = response
            .text()
            .await
            .ok()
            .map(|body| body.trim().to_string())
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => KvError::PermissionDenied(message),
            StatusCode::TOO_MANY_REQUESTS => KvError::Unavailable(format!("rate limited: {}", message)),
            _ if status.is_server_error() => {
                KvError::Unavailable(format!("Consul server error {}: {}", status.as_u16(), message))
            }
            _ => KvError::ApiError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Parse a `true`/`false` write response.
    async fn write_outcome(response: Response, key: &str, guarded: bool) -> Result<(), KvError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| KvError::InvalidResponse(format!("failed to read response: {}", e)))?;
        match body.trim() {
            "true" => Ok(()),
            "false" if guarded => Err(KvError::CasMismatch {
                key: key.to_string(),
            }),
            other => Err(KvError::ApiError {
                status: status.as_u16(),
                message: format!("write of '{}' not acknowledged: {}", key, other),
            }),
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> KvError {
    if e.is_timeout() {
        KvError::Unavailable(format!("request timed out: {}", e))
    } else if e.is_connect() {
        KvError::Unavailable(format!("connection failed: {}", e))
    } else {
        KvError::Unavailable(e.to_string())
    }
}

fn read_index(response: &Response) -> ModifyIndex {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(ModifyIndex::new)
        .unwrap_or_default()
}

/// One element of a `GET /v1/kv` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulKvPair {
    key: String,
    value: Option<String>,
    modify_index: u64,
    #[serde(default)]
    flags: u64,
}

impl TryFrom<ConsulKvPair> for RemoteEntry {
    type Error = KvError;

    fn try_from(pair: ConsulKvPair) -> Result<Self, Self::Error> {
        let value = match pair.value {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                KvError::InvalidResponse(format!("value of '{}' is not base64: {}", pair.key, e))
            })?,
            None => Vec::new(),
        };
        Ok(RemoteEntry {
            key: pair.key,
            value,
            modify_index: ModifyIndex::new(pair.modify_index),
            flags: pair.flags,
        })
    }
}

async fn parse_pairs(response: Response) -> Result<Vec<RemoteEntry>, KvError> {
    let pairs: Vec<ConsulKvPair> = response
        .json()
        .await
        .map_err(|e| KvError::InvalidResponse(format!("failed to parse response: {}", e)))?;
    pairs.into_iter().map(RemoteEntry::try_from).collect()
}

#[async_trait]
impl KvStore for ConsulKv {
    fn name(&self) -> &'static str {
        "consul"
    }

    async fn list_under(&self, prefix: &str) -> Result<Listing, KvError> {
        let mut url = self.kv_url(prefix);
        url.query_pairs_mut().append_pair("recurse", "true");

        let response = self.send(self.request(Method::GET, url)).await?;
        let index = read_index(&response);

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Listing {
                entries: Vec::new(),
                index,
            }),
            s if s.is_success() => Ok(Listing {
                entries: parse_pairs(response).await?,
                index,
            }),
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn list_keys(
        &self,
        prefix: &str,
        separator: Option<char>,
    ) -> Result<Vec<String>, KvError> {
        let mut url = self.kv_url(prefix);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("keys", "true");
            if let Some(sep) = separator {
                query.append_pair("separator", &sep.to_string());
            }
        }

        let response = self.send(self.request(Method::GET, url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| KvError::InvalidResponse(format!("failed to parse key list: {}", e))),
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, KvError> {
        let url = self.kv_url(key);
        let response = self.send(self.request(Method::GET, url)).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                // Without recurse Consul still answers with a one-element array.
                let mut entries = parse_pairs(response).await?;
                Ok(entries.pop())
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expected: Option<ModifyIndex>,
    ) -> Result<(), KvError> {
        let mut url = self.kv_url(key);
        if let Some(index) = expected {
            url.query_pairs_mut()
                .append_pair("cas", &index.get().to_string());
        }

        let response = self
            .send(self.request(Method::PUT, url).body(value.to_vec()))
            .await?;
        Self::write_outcome(response, key, expected.is_some()).await
    }

    async fn delete(&self, key: &str, expected: Option<ModifyIndex>) -> Result<(), KvError> {
        let mut url = self.kv_url(key);
        if let Some(index) = expected {
            url.query_pairs_mut()
                .append_pair("cas", &index.get().to_string());
        }

        let response = self.send(self.request(Method::DELETE, url)).await?;
        Self::write_outcome(response, key, expected.is_some()).await
    }
}

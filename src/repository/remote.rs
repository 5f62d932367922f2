//! HTTP object store client
//!
//! Speaks a minimal bucket protocol:
//! `GET|PUT|DELETE {endpoint}/{bucket}/{key}` and
//! `GET {endpoint}/{bucket}?prefix=...` answering `{"keys": [...]}`.

use crate::config::RemoteStoreConfig;
use crate::error::StoreError;
use crate::repository::retry::{AttemptError, RetryPolicy};
use crate::repository::ObjectStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Body of a prefix listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyListing {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteObjectStore {
    client: Client,
    bucket_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl RemoteObjectStore {
    pub fn new(
        config: &RemoteStoreConfig,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bucket_url: format!(
                "{}/{}",
                config.endpoint.trim_end_matches('/'),
                config.bucket.trim_matches('/')
            ),
            token: config.token.clone(),
            retry,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url, key)
    }

    /// Send a request with retries. `Ok(None)` means the object does not exist.
    async fn execute<B>(&self, op: &'static str, build: B) -> Result<Option<Vec<u8>>, StoreError>
    where
        B: Fn(&Client) -> RequestBuilder,
    {
        self.retry
            .run(op, || {
                let mut request = build(&self.client);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| AttemptError::Transient(e.to_string()))?;

                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| AttemptError::Transient(e.to_string()))?;
                        return Ok(Some(body.to_vec()));
                    }
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(AttemptError::Transient(format!("{} answered {}", op, status)));
                    }
                    Err(AttemptError::Permanent(StoreError::Unavailable(format!(
                        "{} rejected with {}",
                        op, status
                    ))))
                }
            })
            .await
    }
}

#[async_trait]
impl ObjectStore for RemoteObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let url = self.object_url(key);
        self.execute("GET", |client| client.get(&url)).await
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError> {
        let url = self.object_url(key);
        debug!(key = %key, bytes = data.len(), "Uploading object");
        match self
            .execute("PUT", |client| client.put(&url).body(data.clone()))
            .await?
        {
            Some(_) => Ok(()),
            None => Err(StoreError::Unavailable(format!(
                "PUT {} answered 404, bucket missing?",
                url
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let url = self.object_url(key);
        self.execute("DELETE", |client| client.delete(&url))
            .await
            .map(|_| ())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let body = self
            .execute("LIST", |client| {
                client.get(&self.bucket_url).query(&[("prefix", prefix)])
            })
            .await?;

        let Some(body) = body else {
            return Ok(Vec::new());
        };
        let mut listing: KeyListing = serde_json::from_slice(&body)
            .map_err(|e| StoreError::Unavailable(format!("malformed listing: {}", e)))?;
        listing.keys.retain(|k| k.starts_with(prefix));
        listing.keys.sort();
        Ok(listing.keys)
    }

    fn describe(&self) -> String {
        format!("remote:{}", self.bucket_url)
    }
}

//! JSON/HTTP implementations of the remote collaborators.
//!
//! Endpoints, relative to the base URL:
//!
//! - `GET  /records/changes?since=<rfc3339>&limit=<n>` returns a [`ChangeSet`]
//! - `POST /records/batch` with `{"records": [...]}` returns an [`UpsertAck`]
//! - `GET  /records/<id>` returns a record, or 404

use crate::error::RemoteError;
use crate::probe::ConnectivityProbe;
use crate::remote::{ChangeSet, RemoteSource, UpsertAck};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regcache_types::RemoteRecord;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

fn build_client(timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::Unreachable(format!("failed to build HTTP client: {e}")))
}

fn parse_base(base_url: &str) -> Result<Url, RemoteError> {
    Url::parse(base_url).map_err(|e| RemoteError::Protocol(format!("invalid base URL: {e}")))
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    records: &'a [RemoteRecord],
}

/// [`RemoteSource`] over JSON/HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteSource {
    client: Client,
    base_url: Url,
}

impl HttpRemoteSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base(base_url)?,
        })
    }

    /// Base URL with extra path segments appended (each one percent-encoded).
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Protocol("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn list_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ChangeSet, RemoteError> {
        let url = self.endpoint(&["records", "changes"])?;
        let mut request = self.client.get(url).query(&[("limit", limit.to_string())]);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        let page: ChangeSet = request.send().await?.error_for_status()?.json().await?;
        debug!("remote returned {} changed records", page.records.len());
        Ok(page)
    }

    async fn batch_upsert(&self, records: &[RemoteRecord]) -> Result<UpsertAck, RemoteError> {
        let url = self.endpoint(&["records", "batch"])?;
        let ack = self
            .client
            .post(url)
            .json(&BatchRequest { records })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ack)
    }

    async fn fetch_record(&self, id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        let url = self.endpoint(&["records", id])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = response.error_for_status()?.json().await?;
        Ok(Some(record))
    }
}

/// Probe that issues `GET <url>` and treats any 2xx as reachable.
#[derive(Debug, Clone)]
pub struct HttpConnectivityProbe {
    client: Client,
    url: Url,
}

impl HttpConnectivityProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: parse_base(url)?,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("connectivity probe failed: {e}");
                false
            }
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::listing::{self, Blob, RUNS_PREFIX};
use super::{Gateway, RunSummary, TestResult};
use crate::config::Config;
use crate::error::GatewayError;

const USER_AGENT: &str = concat!("petri-viewer/", env!("CARGO_PKG_VERSION"));

/// [`Gateway`] backed by a blob container's REST listing API and the
/// GitHub pull-request API.
#[derive(Debug, Clone)]
pub struct BlobClient {
    client: Client,
    container_url: String,
    pr_api_url: String,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    title: Option<String>,
}

impl BlobClient {
    pub fn new(
        container_url: &str,
        pr_api_url: &str,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            container_url: container_url.trim_end_matches('/').to_string(),
            pr_api_url: pr_api_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(&config.container_url, &config.pr_api_url, config.request_timeout())
    }

    pub fn container_url(&self) -> &str {
        &self.container_url
    }

    /// Fetch every page of a listing under `prefix`.
    async fn list_blobs(&self, prefix: &str, metadata: bool) -> Result<Vec<Blob>, GatewayError> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![
                ("restype", "container"),
                ("comp", "list"),
                ("prefix", prefix),
            ];
            if metadata {
                query.push(("include", "metadata"));
            }
            if let Some(m) = marker.as_deref() {
                query.push(("marker", m));
            }

            let resp = self.get(&self.container_url, &query).await?;
            let body = self.read_text(&self.container_url, resp).await?;
            let page = listing::parse_page(&body).map_err(|e| GatewayError::Decode {
                url: self.container_url.clone(),
                message: e.to_string(),
            })?;

            debug!(%prefix, count = page.blobs.len(), "Listed blob page");
            blobs.extend(page.blobs);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(blobs)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, GatewayError> {
        self.client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.request_error(url, &e))
    }

    async fn read_text(&self, url: &str, resp: Response) -> Result<String, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(|e| self.request_error(url, &e))
    }

    fn request_error(&self, url: &str, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                url: url.to_string(),
                after: self.timeout.unwrap_or_default(),
            }
        } else {
            GatewayError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Gateway for BlobClient {
    async fn list_runs(&self) -> Result<Vec<RunSummary>, GatewayError> {
        let blobs = self.list_blobs(RUNS_PREFIX, true).await?;
        Ok(listing::runs_from_blobs(&blobs))
    }

    async fn list_run_details(&self, run_id: &str) -> Result<Vec<TestResult>, GatewayError> {
        let blobs = self.list_blobs(&format!("{run_id}/"), false).await?;
        if blobs.is_empty() {
            return Err(GatewayError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        Ok(listing::tests_from_blobs(run_id, &blobs))
    }

    async fn fetch_pr_title(&self, pr_number: u64) -> Result<Option<String>, GatewayError> {
        let url = format!("{}/{pr_number}", self.pr_api_url);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| self.request_error(&url, &e))?;

        if resp.status() == StatusCode::FORBIDDEN {
            warn!(pr = pr_number, "Pull request API rate limited; title unavailable");
            return Ok(None);
        }

        let body = self.read_text(&url, resp).await?;
        let pr: PullRequest = serde_json::from_str(&body).map_err(|e| GatewayError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(pr.title)
    }

    async fn fetch_text(&self, path: &str) -> Result<String, GatewayError> {
        let url = format!("{}/{}", self.container_url, path.trim_start_matches('/'));
        let resp = self.get(&url, &[]).await?;
        self.read_text(&url, resp).await
    }
}

//! reqwest-backed upstream: `GET {base}/poem/random`.

use std::time::Duration;

use async_trait::async_trait;

use super::{FetchFailure, RawResponse, UpstreamSource};

pub struct HttpUpstream {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchFailure> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstream {
    async fn random_poem(&self) -> Result<RawResponse, FetchFailure> {
        let resp = self
            .http
            .get(format!("{}/poem/random", self.base_url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchFailure::Timeout
                } else {
                    FetchFailure::Transport(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;
        Ok(RawResponse { status, body })
    }
}

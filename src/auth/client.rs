//! Client for the refresh endpoint

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use url::Url;

use super::types::{RefreshRequest, RefreshResponse};
use crate::config::SessionOptions;
use crate::error::{Error, RefreshError};
use crate::fetch::Fetch;

/// Performs the refresh call; implementations classify failures into
/// [`RefreshError::Rejected`] and [`RefreshError::Transport`]
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, RefreshError>;
}

/// [`RefreshClient`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpRefreshClient {
    client: Client,
    url: String,
    timeout: Option<Duration>,
}

impl HttpRefreshClient {
    pub fn new(client: Client, options: &SessionOptions) -> Result<Self, Error> {
        let url = Url::parse(&options.base_url)?.join(&options.refresh_path)?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout: options.request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, RefreshError> {
        let response = Fetch::post(&self.client, &self.url)
            .header("X-Client-Info", "rental-session/0.2.0")
            .timeout(self.timeout)
            .json(request)?
            .execute::<RefreshResponse>()
            .await?;
        debug!("Refresh endpoint issued a new access token");
        Ok(response)
    }
}

//! Archive API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{CharterError, Result};
use crate::services::query::ThreadQuery;
use crate::sync::NetworkDataSource;
use crate::types::NetworkMessage;

/// Fetches messages from the archive over HTTP.
pub struct HttpDataSource {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl HttpDataSource {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("charter-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CharterError::Network(format!("HTTP client error: {}", e)))?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            credentials,
        })
    }
}

/// Request URL for a query.
///
/// Parameters are form-encoded, then `%25` is turned back into `%` so that
/// values escaped ahead of time (`%2B` for `+` in ids) reach the server
/// escaped once rather than twice.
pub fn request_url(base_url: &str, query: &ThreadQuery) -> Result<String> {
    let mut url = Url::parse(base_url)
        .map_err(|e| CharterError::Config(format!("Invalid base URL {}: {}", base_url, e)))?;

    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query.remote_parameters() {
            pairs.append_pair(key, &value);
        }
    }

    Ok(url.as_str().replace("%25", "%"))
}

#[async_trait]
impl NetworkDataSource for HttpDataSource {
    async fn get_threads(&self, query: &ThreadQuery) -> Result<Vec<NetworkMessage>> {
        let url = request_url(&self.base_url, query)?;
        debug!("GET {}", url);

        let mut request = self.client.get(&url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Archive request failed with status {}", status);
            return Err(CharterError::Network(format!(
                "Archive returned HTTP {}",
                status
            )));
        }

        let body = response.bytes().await?;
        let messages = NetworkMessage::list_from_json(&body)?;

        debug!("Archive returned {} messages", messages.len());
        Ok(messages)
    }
}

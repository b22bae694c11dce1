use eadsync_core::error::AppError;
use eadsync_core::traits::IndexClient;
use reqwest::Client;
use serde::Serialize;

use crate::aspace::map_send_error;
use crate::config::IndexConfig;

const REINDEX_PATH: &str = "/api/v1/index/index_ead";

/// Finding-aid index client using reqwest.
#[derive(Clone)]
pub struct ReqwestIndexClient {
    client: Client,
    endpoint: String,
    token: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ReindexRequest<'a> {
    bibids: &'a [String],
}

impl ReqwestIndexClient {
    pub fn new(config: &IndexConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("eadsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{REINDEX_PATH}", config.base_url.trim_end_matches('/')),
            token: config.token.clone(),
            timeout_secs: config.timeout.as_secs(),
        })
    }
}

impl IndexClient for ReqwestIndexClient {
    async fn reindex(&self, bibids: &[String]) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Token {}", self.token))
            .json(&ReindexRequest { bibids })
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}: {}",
                status.as_u16(),
                REINDEX_PATH,
                body.trim()
            )));
        }
        tracing::debug!(count = bibids.len(), "Reindex accepted");
        Ok(())
    }
}

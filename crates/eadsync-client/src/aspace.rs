use std::sync::Arc;

use eadsync_core::error::AppError;
use eadsync_core::job::{JobHandle, JobStatus, PdfJobRequest};
use eadsync_core::models::{Record, Repository, Watermark};
use eadsync_core::traits::ArchivesSpace;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::AspaceConfig;

const SESSION_HEADER: &str = "X-ArchivesSpace-Session";

/// ArchivesSpace API client using reqwest.
///
/// Authenticates once on [`connect`](Self::connect) and sends the session
/// token with every request.
#[derive(Clone)]
pub struct ReqwestArchivesSpace {
    client: Client,
    base_url: String,
    session: Arc<str>,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct LoginResponse {
    session: String,
}

#[derive(Deserialize)]
struct CreatedResponse {
    uri: String,
}

#[derive(Deserialize)]
struct JobResponse {
    uri: String,
    status: String,
}

impl ReqwestArchivesSpace {
    /// Log in and return a client bound to the new session.
    pub async fn connect(config: &AspaceConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("eadsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        let timeout_secs = config.timeout.as_secs();

        let mut url = build_url(&config.base_url, &format!("/users/{}/login", config.username))?;
        url.query_pairs_mut()
            .append_pair("password", &config.password);

        let response = client
            .post(url)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout_secs))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ConfigError(format!(
                "ArchivesSpace login failed for user '{}': HTTP {}",
                config.username,
                status.as_u16()
            )));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse login response: {e}")))?;

        tracing::info!(base_url = %config.base_url, user = %config.username, "Logged in to ArchivesSpace");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session: Arc::from(login.session),
            timeout_secs,
        })
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        build_url(&self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, AppError> {
        let response = request
            .header(SESSION_HEADER, &*self.session)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url.path()
            )));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, AppError> {
        self.send(self.client.get(url.clone()), &url)
            .await?
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse response from {}: {e}", url.path())))
    }

    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>, AppError> {
        let bytes = self
            .send(self.client.get(url.clone()), &url)
            .await?
            .bytes()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

impl ArchivesSpace for ReqwestArchivesSpace {
    async fn list_repositories(&self) -> Result<Vec<Repository>, AppError> {
        self.get_json(self.url("/repositories")?).await
    }

    async fn list_modified_resource_ids(
        &self,
        repo_id: u32,
        watermark: Watermark,
    ) -> Result<Vec<u64>, AppError> {
        let mut url = self.url(&format!("/repositories/{repo_id}/resources"))?;
        url.query_pairs_mut()
            .append_pair("all_ids", "true")
            .append_pair("modified_since", &watermark.epoch_seconds().to_string());
        self.get_json(url).await
    }

    async fn get_resource(&self, repo_id: u32, resource_id: u64) -> Result<Record, AppError> {
        self.get_json(self.url(&format!("/repositories/{repo_id}/resources/{resource_id}"))?)
            .await
    }

    async fn export_ead(&self, repo_id: u32, resource_id: u64) -> Result<Vec<u8>, AppError> {
        let mut url = self.url(&format!(
            "/repositories/{repo_id}/resource_descriptions/{resource_id}.xml"
        ))?;
        url.query_pairs_mut()
            .append_pair("include_unpublished", "false")
            .append_pair("include_daos", "true");
        self.get_bytes(url).await
    }

    async fn export_marc(&self, repo_id: u32, resource_id: u64) -> Result<Vec<u8>, AppError> {
        self.get_bytes(self.url(&format!(
            "/repositories/{repo_id}/resources/marc21/{resource_id}.xml"
        ))?)
        .await
    }

    async fn submit_job(&self, repo_id: u32, request: &PdfJobRequest) -> Result<JobHandle, AppError> {
        let url = self.url(&format!("/repositories/{repo_id}/jobs"))?;
        let response = self
            .send(self.client.post(url.clone()).json(request), &url)
            .await
            .map_err(|e| AppError::JobSubmission(e.to_string()))?;
        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| AppError::JobSubmission(format!("Unexpected job response: {e}")))?;
        Ok(JobHandle::queued(created.uri))
    }

    async fn job_status(&self, job_uri: &str) -> Result<JobHandle, AppError> {
        let job: JobResponse = self.get_json(self.url(job_uri)?).await?;
        let status: JobStatus = job.status.parse().map_err(AppError::Generic)?;
        Ok(JobHandle {
            uri: job.uri,
            status,
            output_files: Vec::new(),
        })
    }

    async fn job_output_files(&self, job_uri: &str) -> Result<Vec<u64>, AppError> {
        self.get_json(self.url(&format!("{job_uri}/output_files"))?)
            .await
    }

    async fn fetch_output_file(&self, job_uri: &str, file_id: u64) -> Result<Vec<u8>, AppError> {
        self.get_bytes(self.url(&format!("{job_uri}/output_files/{file_id}"))?)
            .await
    }
}

fn build_url(base_url: &str, path: &str) -> Result<Url, AppError> {
    let raw = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&raw).map_err(|e| AppError::HttpError(format!("Invalid URL '{raw}': {e}")))
}

pub(crate) fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

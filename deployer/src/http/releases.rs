//! Release service client

use async_trait::async_trait;
use release_api::{CreateReleaseInput, CreateReleaseResponse, Release};

use crate::api::ReleaseBackend;
use crate::errors::ApiError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Record a new release of an app
    pub async fn post_release(&self, input: &CreateReleaseInput) -> Result<Release, ApiError> {
        let path = format!("/apps/{}/releases", input.app_id);
        let response: CreateReleaseResponse = self.post(&path, input, None).await?;
        Ok(response.release)
    }
}

#[async_trait]
impl ReleaseBackend for HttpClient {
    async fn create_release(&self, input: CreateReleaseInput) -> Result<Release, ApiError> {
        self.post_release(&input).await
    }
}

//! HTTP analysis collaborator
//!
//! POSTs each unit request as JSON to `{base_url}/analyze` and expects a
//! [`CollaboratorResponse`] body. Requests from every concurrently executing
//! unit share one rate limiter, awaited through [`AnalysisCollaborator::ready`].
//!
//! 429 and 5xx replies are retryable; any other non-success status is a
//! rejection; an undecodable success body is malformed.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;

use super::executor::{AnalysisCollaborator, AnalysisRequest, CollaboratorError, CollaboratorResponse};
use crate::config::OrchestratorSettings;

pub struct HttpAnalysisClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    /// Shared across all in-flight units
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpAnalysisClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        requests_per_minute: u32,
        request_timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("HTTP client init failed: {}", e)))?;

        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter,
        })
    }

    /// Build from resolved settings; `None` when no collaborator URL is configured
    pub fn from_settings(settings: &OrchestratorSettings) -> Option<Result<Self, CollaboratorError>> {
        let url = settings.collaborator_url.as_deref()?;
        Some(Self::new(
            url,
            settings.collaborator_api_key.clone(),
            settings.collaborator_requests_per_minute,
            // The executor enforces the unit timeout; this only stops leaked sockets
            settings.unit_timeout() + Duration::from_secs(30),
        ))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/analyze", self.base_url)
    }
}

#[async_trait]
impl AnalysisCollaborator for HttpAnalysisClient {
    async fn ready(&self) {
        self.rate_limiter.until_ready().await;
    }

    async fn invoke(
        &self,
        request: &AnalysisRequest<'_>,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        tracing::debug!(
            run_id = %request.run_id,
            run_type = %request.run_type,
            "Calling analysis collaborator"
        );

        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(CollaboratorError::Unavailable(format!(
                "collaborator returned {}",
                status
            )));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        response
            .json::<CollaboratorResponse>()
            .await
            .map_err(|e| CollaboratorError::Malformed(e.to_string()))
    }
}

use std::sync::Arc;

use horde_contracts::jobs::{GenerationDefaults, GenerationRequest, SubmissionResult};
use log::{debug, info};

use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::{HordeError, Operation};
use crate::transport::{HttpRequest, Transport};

pub const SUBMIT_PATH: &str = "/generate/async";
pub const API_KEY_HEADER: &str = "apikey";
const ACCEPTED: u16 = 202;

/// Posts generation requests. Failures are surfaced immediately, never retried.
pub struct SubmissionClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
    api_key: String,
    defaults: GenerationDefaults,
}

impl SubmissionClient {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            endpoint: config.endpoint(SUBMIT_PATH),
            api_key: config.api_key.clone(),
            defaults: config.defaults.clone(),
        }
    }

    /// Once the service has accepted the job, a cancellation observed after
    /// the POST is reported as [`HordeError::CancelledAfterSubmit`] carrying
    /// the new job id, so the caller can still cancel it remotely.
    pub fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<SubmissionResult, HordeError> {
        let effective = request.resolve(&self.defaults)?;
        debug!(
            "submitting generation: steps={} width={} height={} model={}",
            effective.params.steps,
            effective.params.width,
            effective.params.height,
            effective.params.model_name
        );

        let body = serde_json::to_value(&effective).map_err(|err| HordeError::Decode {
            operation: Operation::Submit,
            detail: format!("request encoding failed: {err}"),
        })?;
        let http_request =
            HttpRequest::post_json(&self.endpoint, body).header(API_KEY_HEADER, &self.api_key);

        cancel.check(Operation::Submit)?;
        let response = self
            .transport
            .send(&http_request)
            .map_err(|err| err.into_horde(Operation::Submit))?;

        let accepted: SubmissionResult = response
            .expect_status(Operation::Submit, ACCEPTED)?
            .decode_json(Operation::Submit)?;
        if accepted.id.trim().is_empty() {
            return Err(HordeError::Decode {
                operation: Operation::Submit,
                detail: "accepted response carried an empty job id".to_string(),
            });
        }
        if cancel.is_cancelled() {
            return Err(HordeError::CancelledAfterSubmit { id: accepted.id });
        }
        if let Some(message) = accepted.message.as_deref().filter(|m| !m.trim().is_empty()) {
            info!("service note for job {}: {message}", accepted.id);
        }
        info!(
            "generation accepted: id={} kudos={}",
            accepted.id, accepted.kudos
        );
        Ok(accepted)
    }
}

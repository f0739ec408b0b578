use std::sync::Arc;

use horde_contracts::events::{EventWriter, JobEvent};
use horde_contracts::jobs::{JobPhase, JobStatus, StatusEndpoint, ValidationError};
use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::{ClientConfig, PollPolicy};
use crate::error::{HordeError, Operation};
use crate::submit::API_KEY_HEADER;
use crate::transport::{HttpRequest, Transport};
use crate::record_event;

/// Drives one job from submission to a terminal state.
///
/// The lightweight `check` endpoint is polled until the service reports
/// `done` or `failed`. A finished job then gets exactly one `status` fetch,
/// because only that endpoint carries the generated image reference.
pub struct StatusPoller {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    base_url: String,
    api_key: String,
    policy: PollPolicy,
    events: Option<EventWriter>,
}

impl StatusPoller {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, config: &ClientConfig) -> Self {
        Self {
            transport,
            clock,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            policy: config.poll.clone(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn wait_for_completion(
        &self,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<JobStatus, HordeError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyJobId.into());
        }

        let started = self.clock.elapsed();
        let mut attempts: u32 = 0;
        loop {
            cancel.check(Operation::CheckStatus)?;
            attempts += 1;
            let status = self.fetch_status(id, StatusEndpoint::Check)?;
            cancel.check(Operation::CheckStatus)?;

            let elapsed = self.clock.elapsed().saturating_sub(started);
            let phase = status.phase();
            debug!(
                "status check #{attempts} for {id} [{:.0}s elapsed]: phase={phase} queue_position={} processing={} waiting={} finished={} wait_time={}s",
                elapsed.as_secs_f64(),
                status.queue_position,
                status.processing_count,
                status.waiting,
                status.finished,
                status.wait_time_seconds,
            );
            self.record(JobEvent::status(id, &status, attempts, elapsed));

            match phase {
                JobPhase::Failed => {
                    return Err(self.failed(id, status.failure_message()));
                }
                JobPhase::Completed => {
                    info!(
                        "job {id} completed after {:.0}s ({attempts} polls)",
                        elapsed.as_secs_f64()
                    );
                    return self.fetch_completed(id, cancel);
                }
                JobPhase::Queued | JobPhase::Processing => {}
            }

            if self.policy.exhausted(elapsed, attempts) {
                warn!(
                    "giving up on job {id} after {:.0}s ({attempts} polls)",
                    elapsed.as_secs_f64()
                );
                return Err(HordeError::Timeout {
                    id: id.to_string(),
                    waited: elapsed,
                    attempts,
                });
            }
            self.clock.sleep(self.policy.interval_for(&status), cancel)?;
        }
    }

    /// The single full-status fetch that follows `done=true`.
    fn fetch_completed(&self, id: &str, cancel: &CancelToken) -> Result<JobStatus, HordeError> {
        cancel.check(Operation::FetchStatus)?;
        let full = self.fetch_status(id, StatusEndpoint::Status)?;
        cancel.check(Operation::FetchStatus)?;

        if full.failed {
            return Err(self.failed(id, full.failure_message()));
        }
        let Some(image_ref) = full.first_image_ref() else {
            self.record(JobEvent::JobFailed {
                job_id: id.to_string(),
                message: "no image reference".to_string(),
            });
            return Err(HordeError::EmptyResult { id: id.to_string() });
        };

        self.record(JobEvent::JobCompleted {
            job_id: id.to_string(),
            image_ref: image_ref.to_string(),
            generations: full.generations.len(),
        });
        Ok(full)
    }

    /// One status call against either endpoint; both share the response shape.
    pub fn fetch_status(&self, id: &str, endpoint: StatusEndpoint) -> Result<JobStatus, HordeError> {
        let operation = match endpoint {
            StatusEndpoint::Check => Operation::CheckStatus,
            StatusEndpoint::Status => Operation::FetchStatus,
        };
        let url = format!("{}{}", self.base_url, endpoint.path(id));
        self.transport
            .send(&HttpRequest::get(url))
            .map_err(|err| err.into_horde(operation))?
            .expect_status(operation, 200)?
            .decode_json(operation)
    }

    /// Asks the service to drop a job the client no longer waits for.
    pub fn cancel_job(&self, id: &str) -> Result<(), HordeError> {
        let url = format!("{}{}", self.base_url, StatusEndpoint::Status.path(id));
        self.transport
            .send(&HttpRequest::delete(url).header(API_KEY_HEADER, &self.api_key))
            .map_err(|err| err.into_horde(Operation::CancelJob))?
            .expect_status(Operation::CancelJob, 200)?;
        info!("requested remote cancellation of job {id}");
        Ok(())
    }

    fn failed(&self, id: &str, message: String) -> HordeError {
        self.record(JobEvent::JobFailed {
            job_id: id.to_string(),
            message: message.clone(),
        });
        HordeError::JobFailed {
            id: id.to_string(),
            message,
        }
    }

    fn record(&self, event: JobEvent) {
        record_event(self.events.as_ref(), event);
    }
}

pub mod cancel;
pub mod clock;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod poll;
pub mod submit;
pub mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use horde_contracts::events::{EventWriter, JobEvent};
use horde_contracts::jobs::{GenerationRequest, SubmissionResult};
use log::{info, warn};

pub use cancel::CancelToken;
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, PollPolicy, DEFAULT_API_BASE, DEFAULT_MAX_WAIT};
pub use convert::{convert_bytes_to_archival, convert_to_archival};
pub use download::ResultDownloader;
pub use error::{ConvertError, HordeError, Operation};
pub use poll::StatusPoller;
pub use submit::SubmissionClient;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, Transport, TransportError,
    TransportErrorKind, DEFAULT_REQUEST_TIMEOUT,
};

/// The raw bytes of one finished generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub job_id: String,
    pub kudos: f64,
    pub image_ref: String,
    pub bytes: Vec<u8>,
}

/// Submit, wait, download. Each client owns its transport, clock and config;
/// nothing is shared between clients.
pub struct HordeClient {
    submitter: SubmissionClient,
    poller: StatusPoller,
    downloader: ResultDownloader,
    events: Option<EventWriter>,
    cancel_remote_on_abort: bool,
}

impl HordeClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_parts(
            &config,
            Arc::new(transport),
            Arc::new(SystemClock::new()),
        ))
    }

    pub fn with_parts(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            submitter: SubmissionClient::new(transport.clone(), config),
            poller: StatusPoller::new(transport.clone(), clock, config),
            downloader: ResultDownloader::new(transport),
            events: None,
            cancel_remote_on_abort: config.cancel_remote_on_abort,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.poller = self.poller.with_events(Some(events.clone()));
        self.events = Some(events);
        self
    }

    pub fn generate_image(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<GeneratedImage, HordeError> {
        self.record(JobEvent::started(request));

        let accepted = match self.submitter.submit(request, cancel) {
            Ok(accepted) => accepted,
            Err(err) => {
                let job_id = err.job_id().map(str::to_string);
                return Err(self.fail(job_id, err));
            }
        };
        self.record(JobEvent::JobSubmitted {
            job_id: accepted.id.clone(),
            kudos: accepted.kudos,
        });

        self.complete(&accepted, cancel)
            .map_err(|err| self.fail(Some(accepted.id.clone()), err))
    }

    fn complete(
        &self,
        accepted: &SubmissionResult,
        cancel: &CancelToken,
    ) -> Result<GeneratedImage, HordeError> {
        let job_id = accepted.id.as_str();
        let status = self.poller.wait_for_completion(job_id, cancel)?;
        let image_ref = status
            .first_image_ref()
            .ok_or_else(|| HordeError::EmptyResult {
                id: job_id.to_string(),
            })?
            .to_string();

        let bytes = self.downloader.download(&image_ref, cancel)?;
        self.record(JobEvent::ImageDownloaded {
            job_id: job_id.to_string(),
            image_ref: image_ref.clone(),
            bytes: bytes.len(),
        });
        info!("job {job_id} produced {} bytes", bytes.len());

        Ok(GeneratedImage {
            job_id: job_id.to_string(),
            kudos: accepted.kudos,
            image_ref,
            bytes,
        })
    }

    /// Records the failure and, when the job was left running on the
    /// service, asks for it to be dropped.
    fn fail(&self, job_id: Option<String>, err: HordeError) -> HordeError {
        if let Some(id) = job_id.as_deref() {
            if err.is_abandoned_wait() && self.cancel_remote_on_abort {
                if let Err(cancel_err) = self.poller.cancel_job(id) {
                    warn!("remote cancellation of job {id} failed: {cancel_err}");
                }
            }
        }
        self.record(JobEvent::GenerationFailed {
            job_id,
            operation: err.operation().map(|operation| operation.as_str().to_string()),
            error: err.to_string(),
        });
        err
    }

    fn record(&self, event: JobEvent) {
        record_event(self.events.as_ref(), event);
    }
}

/// Telemetry never fails a generation; a lost event is only logged.
pub(crate) fn record_event(events: Option<&EventWriter>, event: JobEvent) {
    let Some(events) = events else {
        return;
    };
    let kind = event.kind();
    if let Err(err) = events.record(event) {
        warn!("failed to record {kind} event: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::{json, Value};

    use super::*;
    use crate::testing::{json_response, should_skip_httpmock, FakeClock, FakeTransport, BASE};

    const IMG: &str = "https://cdn.horde.test/abc123.webp";

    fn client(transport: &Arc<FakeTransport>, config: ClientConfig) -> HordeClient {
        HordeClient::with_parts(&config, transport.clone(), Arc::new(FakeClock::new()))
    }

    fn config() -> ClientConfig {
        ClientConfig::new("secret").with_base_url(BASE)
    }

    fn script_happy_path(transport: &FakeTransport) {
        transport
            .reply(
                Method::Post,
                format!("{BASE}/generate/async"),
                json_response(202, json!({"id": "abc123", "kudos": 10.0})),
            )
            .reply(
                Method::Get,
                format!("{BASE}/generate/check/abc123"),
                json_response(200, json!({"processing": 1})),
            )
            .reply(
                Method::Get,
                format!("{BASE}/generate/check/abc123"),
                json_response(200, json!({"done": true, "finished": 1})),
            )
            .reply(
                Method::Get,
                format!("{BASE}/generate/status/abc123"),
                json_response(200, json!({"done": true, "generations": [{"img": IMG}]})),
            )
            .reply(
                Method::Get,
                IMG,
                Ok(HttpResponse {
                    status: 200,
                    body: vec![7; 100],
                }),
            );
    }

    #[test]
    fn generate_image_runs_submit_wait_download() {
        let transport = Arc::new(FakeTransport::new());
        script_happy_path(&transport);

        let image = client(&transport, config())
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())
            .unwrap();
        assert_eq!(image.job_id, "abc123");
        assert_eq!(image.kudos, 10.0);
        assert_eq!(image.image_ref, IMG);
        assert_eq!(image.bytes.len(), 100);

        assert_eq!(
            transport.urls(),
            vec![
                format!("{BASE}/generate/async"),
                format!("{BASE}/generate/check/abc123"),
                format!("{BASE}/generate/check/abc123"),
                format!("{BASE}/generate/status/abc123"),
                IMG.to_string(),
            ]
        );
        let requests = transport.requests();
        let keyed: Vec<bool> = requests
            .iter()
            .map(|request| request.header_value("apikey").is_some())
            .collect();
        assert_eq!(keyed, vec![true, false, false, false, false]);
    }

    #[test]
    fn empty_generations_never_download() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .reply(
                Method::Post,
                format!("{BASE}/generate/async"),
                json_response(202, json!({"id": "abc123"})),
            )
            .reply(
                Method::Get,
                format!("{BASE}/generate/check/abc123"),
                json_response(200, json!({"done": true})),
            )
            .reply(
                Method::Get,
                format!("{BASE}/generate/status/abc123"),
                json_response(200, json!({"done": true, "generations": [{"img": ""}]})),
            );

        let err = client(&transport, config())
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())
            .unwrap_err();
        assert!(err.is_terminal_job_state());
        assert!(matches!(err, HordeError::EmptyResult { .. }));
        assert_eq!(transport.requests().len(), 3);
    }

    fn script_endless_queue(transport: &FakeTransport) {
        transport
            .reply(
                Method::Post,
                format!("{BASE}/generate/async"),
                json_response(202, json!({"id": "slow"})),
            )
            .reply(
                Method::Get,
                format!("{BASE}/generate/check/slow"),
                json_response(200, json!({"queue_position": 50})),
            );
    }

    #[test]
    fn timeout_cancels_job_remotely() {
        let transport = Arc::new(FakeTransport::new());
        script_endless_queue(&transport);
        transport.reply(
            Method::Delete,
            format!("{BASE}/generate/status/slow"),
            json_response(200, json!({})),
        );
        let config = config().with_max_wait(Duration::from_secs(20));

        let err = client(&transport, config)
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HordeError::Timeout { .. }));
        let deletes = transport.count(Method::Delete, &format!("{BASE}/generate/status/slow"));
        assert_eq!(deletes, 1);
    }

    #[test]
    fn failed_remote_cancel_keeps_timeout_error() {
        let transport = Arc::new(FakeTransport::new());
        script_endless_queue(&transport);
        let config = config().with_max_wait(Duration::from_secs(5));

        let err = client(&transport, config)
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HordeError::Timeout { .. }));
        assert_eq!(
            transport.count(Method::Delete, &format!("{BASE}/generate/status/slow")),
            1
        );
    }

    #[test]
    fn remote_cancel_can_be_disabled() {
        let transport = Arc::new(FakeTransport::new());
        script_endless_queue(&transport);
        let config = config()
            .with_max_wait(Duration::from_secs(5))
            .with_cancel_remote_on_abort(false);

        let err = client(&transport, config)
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HordeError::Timeout { .. }));
        assert_eq!(
            transport.count(Method::Delete, &format!("{BASE}/generate/status/slow")),
            0
        );
    }

    #[test]
    fn cancellation_during_wait_cancels_job_remotely() {
        let transport = Arc::new(FakeTransport::new());
        script_endless_queue(&transport);
        transport.reply(
            Method::Delete,
            format!("{BASE}/generate/status/slow"),
            json_response(200, json!({})),
        );
        let clock = Arc::new(FakeClock::new());
        let cancel = CancelToken::new();
        clock.cancel_during_sleep(1, cancel.clone());
        let client = HordeClient::with_parts(&config(), transport.clone(), clock);

        let err = client
            .generate_image(&GenerationRequest::new("a red apple"), &cancel)
            .unwrap_err();
        assert!(matches!(
            err,
            HordeError::Cancelled {
                operation: Operation::Wait
            }
        ));
        assert_eq!(
            transport.count(Method::Delete, &format!("{BASE}/generate/status/slow")),
            1
        );
    }

    #[test]
    fn cancellation_while_submitting_cancels_accepted_job() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let transport = Arc::new(FakeTransport::new());
        script_happy_path(&transport);
        transport.reply(
            Method::Delete,
            format!("{BASE}/generate/status/abc123"),
            json_response(200, json!({})),
        );
        let cancel = CancelToken::new();
        transport.cancel_during_request(1, cancel.clone());

        let err = client(&transport, config())
            .with_events(EventWriter::new(&events_path, "session-3"))
            .generate_image(&GenerationRequest::new("a red apple"), &cancel)
            .unwrap_err();
        assert!(matches!(err, HordeError::CancelledAfterSubmit { ref id } if id == "abc123"));
        assert_eq!(
            transport.urls(),
            vec![
                format!("{BASE}/generate/async"),
                format!("{BASE}/generate/status/abc123"),
            ]
        );
        assert_eq!(transport.requests()[1].method, Method::Delete);

        let content = std::fs::read_to_string(&events_path)?;
        let last: Value = serde_json::from_str(content.lines().last().unwrap_or_default())?;
        assert_eq!(last["type"], json!("generation_failed"));
        assert_eq!(last["job_id"], json!("abc123"));
        Ok(())
    }

    #[test]
    fn events_trace_the_generation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("run").join("events.jsonl");
        let transport = Arc::new(FakeTransport::new());
        script_happy_path(&transport);

        client(&transport, config())
            .with_events(EventWriter::new(&events_path, "session-1"))
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())?;

        let content = std::fs::read_to_string(&events_path)?;
        let events = content
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "generation_started",
                "job_submitted",
                "job_status",
                "job_status",
                "job_completed",
                "image_downloaded",
            ]
        );
        assert!(events.iter().all(|event| event["session_id"] == "session-1"));
        assert_eq!(events[1]["job_id"], json!("abc123"));
        assert_eq!(events[5]["bytes"], json!(100));
        Ok(())
    }

    #[test]
    fn failure_is_recorded_as_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let transport = Arc::new(FakeTransport::new());
        transport.reply(
            Method::Post,
            format!("{BASE}/generate/async"),
            json_response(401, json!({"message": "invalid api key"})),
        );

        let result = client(&transport, config())
            .with_events(EventWriter::new(&events_path, "session-2"))
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new());
        assert!(result.is_err());

        let content = std::fs::read_to_string(&events_path)?;
        let last: Value = serde_json::from_str(content.lines().last().unwrap_or_default())?;
        assert_eq!(last["type"], json!("generation_failed"));
        assert_eq!(last["operation"], json!("submit"));
        assert!(last["error"]
            .as_str()
            .unwrap_or_default()
            .contains("invalid api key"));
        Ok(())
    }

    #[test]
    fn generate_image_over_http() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        let submit = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v2/generate/async")
                .header("apikey", "secret")
                .json_body(json!({
                    "prompt": "a red apple",
                    "params": {"steps": 30, "width": 640, "height": 512, "model": "stable_diffusion_2.1"}
                }));
            then.status(202)
                .header("content-type", "application/json")
                .body(json!({"id": "abc123", "kudos": 10.0}).to_string());
        });
        let check = server.mock(|when, then| {
            when.method(GET).path("/api/v2/generate/check/abc123");
            then.status(200)
                .header("content-type", "application/json")
                .body(json!({"done": true, "processing": 0}).to_string());
        });
        let status = server.mock(|when, then| {
            when.method(GET).path("/api/v2/generate/status/abc123");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    json!({"done": true, "generations": [{"img": server.url("/img/abc123.webp")}]})
                        .to_string(),
                );
        });
        let image = server.mock(|when, then| {
            when.method(GET).path("/img/abc123.webp");
            then.status(200).body(vec![42u8; 100]);
        });

        let config = ClientConfig::new("secret")
            .with_base_url(server.url("/api/v2"))
            .with_poll_policy(PollPolicy {
                processing_interval: Duration::ZERO,
                queued_interval: Duration::ZERO,
                ..PollPolicy::default()
            });
        let generated = HordeClient::new(config)?
            .generate_image(&GenerationRequest::new("a red apple"), &CancelToken::new())?;

        submit.assert();
        check.assert();
        status.assert();
        image.assert();
        assert_eq!(generated.job_id, "abc123");
        assert_eq!(generated.bytes, vec![42u8; 100]);
        Ok(())
    }
}

use std::time::Duration;

use horde_contracts::jobs::{GenerationDefaults, JobStatus};

use crate::transport::DEFAULT_REQUEST_TIMEOUT;

pub const DEFAULT_API_BASE: &str = "https://stablehorde.net/api/v2";
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(15 * 60);

/// Interval and give-up policy for the status loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub processing_interval: Duration,
    pub queued_interval: Duration,
    pub max_wait: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            processing_interval: Duration::from_secs(2),
            queued_interval: Duration::from_secs(5),
            max_wait: DEFAULT_MAX_WAIT,
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    /// Jobs holding a worker are polled more eagerly than queued ones.
    /// Queue position and wait estimates do not affect the interval.
    pub fn interval_for(&self, status: &JobStatus) -> Duration {
        if status.processing_count != 0 {
            self.processing_interval
        } else {
            self.queued_interval
        }
    }

    pub fn exhausted(&self, elapsed: Duration, attempts: u32) -> bool {
        elapsed >= self.max_wait
            || self
                .max_attempts
                .map(|limit| attempts >= limit)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
    pub defaults: GenerationDefaults,
    pub cancel_remote_on_abort: bool,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll: PollPolicy::default(),
            defaults: GenerationDefaults::default(),
            cancel_remote_on_abort: true,
        }
    }

    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        let trimmed = base_url.as_ref().trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.base_url = trimmed.to_string();
        }
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.poll.max_wait = max_wait;
        self
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_cancel_remote_on_abort(mut self, enabled: bool) -> Self {
        self.cancel_remote_on_abort = enabled;
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

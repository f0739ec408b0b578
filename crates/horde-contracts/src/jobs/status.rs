use std::fmt;

use serde::{Deserialize, Serialize};

/// Body of a `202 Accepted` answer to `POST /generate/async`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub kudos: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Generation {
    #[serde(rename = "img", default)]
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Shared shape of the lightweight (`/generate/check`) and full
/// (`/generate/status`) poll responses.
///
/// Only the full response carries usable `generations`; the list on a
/// lightweight response is not to be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JobStatus {
    pub done: bool,
    #[serde(alias = "faulted")]
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "wait_time")]
    pub wait_time_seconds: i64,
    pub queue_position: i64,
    #[serde(rename = "processing")]
    pub processing_count: i64,
    pub finished: i64,
    pub waiting: i64,
    pub generations: Vec<Generation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobStatus {
    pub fn phase(&self) -> JobPhase {
        if self.failed {
            JobPhase::Failed
        } else if self.done {
            JobPhase::Completed
        } else if self.processing_count != 0 {
            JobPhase::Processing
        } else {
            JobPhase::Queued
        }
    }

    pub fn first_image_ref(&self) -> Option<&str> {
        self.generations
            .iter()
            .map(|generation| generation.image_ref.trim())
            .find(|image_ref| !image_ref.is_empty())
    }

    pub fn failure_message(&self) -> String {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or("no message from service")
            .to_string()
    }
}

/// Which status endpoint a poll targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEndpoint {
    /// `/generate/check/{id}`: cheap, no result payload.
    Check,
    /// `/generate/status/{id}`: carries `generations[].img`.
    Status,
}

impl StatusEndpoint {
    pub fn path(self, id: &str) -> String {
        match self {
            Self::Check => format!("/generate/check/{id}"),
            Self::Status => format!("/generate/status/{id}"),
        }
    }
}

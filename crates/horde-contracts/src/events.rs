use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{GenerationRequest, JobPhase, JobStatus};

/// One step of a generation, as recorded in the telemetry log.
///
/// Serialized internally tagged: the variant name becomes the `type` field
/// (`job_submitted`, `job_status`, ...) next to the variant's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    GenerationStarted {
        prompt: String,
        steps: u32,
        width: u32,
        height: u32,
        model: String,
    },
    JobSubmitted {
        job_id: String,
        kudos: f64,
    },
    JobStatus {
        job_id: String,
        attempt: u32,
        elapsed_s: f64,
        phase: JobPhase,
        queue_position: i64,
        processing: i64,
        wait_time: i64,
        finished: i64,
        waiting: i64,
    },
    JobCompleted {
        job_id: String,
        image_ref: String,
        generations: usize,
    },
    JobFailed {
        job_id: String,
        message: String,
    },
    ImageDownloaded {
        job_id: String,
        image_ref: String,
        bytes: usize,
    },
    ImageConverted {
        job_id: String,
        input: PathBuf,
        output: PathBuf,
    },
    GenerationFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
        error: String,
    },
}

impl JobEvent {
    /// Parameters exactly as the caller asked for them, before defaults.
    pub fn started(request: &GenerationRequest) -> Self {
        Self::GenerationStarted {
            prompt: request.prompt.clone(),
            steps: request.params.steps,
            width: request.params.width,
            height: request.params.height,
            model: request.params.model_name.clone(),
        }
    }

    pub fn status(job_id: &str, status: &JobStatus, attempt: u32, elapsed: Duration) -> Self {
        Self::JobStatus {
            job_id: job_id.to_string(),
            attempt,
            elapsed_s: elapsed.as_secs_f64(),
            phase: status.phase(),
            queue_position: status.queue_position,
            processing: status.processing_count,
            wait_time: status.wait_time_seconds,
            finished: status.finished,
            waiting: status.waiting,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerationStarted { .. } => "generation_started",
            Self::JobSubmitted { .. } => "job_submitted",
            Self::JobStatus { .. } => "job_status",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::ImageDownloaded { .. } => "image_downloaded",
            Self::ImageConverted { .. } => "image_converted",
            Self::GenerationFailed { .. } => "generation_failed",
        }
    }

    /// The service-side job this event belongs to, once one exists.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::GenerationStarted { .. } => None,
            Self::GenerationFailed { job_id, .. } => job_id.as_deref(),
            Self::JobSubmitted { job_id, .. }
            | Self::JobStatus { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::ImageDownloaded { job_id, .. }
            | Self::ImageConverted { job_id, .. } => Some(job_id),
        }
    }
}

/// A [`JobEvent`] stamped with its session and time: one line of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: String,
    pub session_id: String,
    #[serde(flatten)]
    pub event: JobEvent,
}

/// JSONL sink for the events of one CLI session.
///
/// The file is opened on the first record and kept open; clones share the
/// handle, so records from several components interleave line by line.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    session_id: String,
    sink: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record(&self, event: JobEvent) -> anyhow::Result<EventRecord> {
        let record = EventRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            session_id: self.session_id.clone(),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event log {} is poisoned", self.path.display()))?;
        if sink.is_none() {
            *sink = Some(self.open()?);
        }
        if let Some(out) = sink.as_mut() {
            out.write_all(&line)?;
            out.flush()?;
        }
        Ok(record)
    }

    fn open(&self) -> anyhow::Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening event log {}", self.path.display()))?;
        Ok(BufWriter::new(file))
    }
}

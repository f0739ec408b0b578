use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use horde_contracts::jobs::ValidationError;
use thiserror::Error;

/// The remote call (or local step) an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Submit,
    CheckStatus,
    FetchStatus,
    CancelJob,
    Download,
    Wait,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::CheckStatus => "check status",
            Self::FetchStatus => "fetch status",
            Self::CancelJob => "cancel job",
            Self::Download => "download",
            Self::Wait => "wait",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum HordeError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("{operation} failed{}: {detail}", status_suffix(.status))]
    Transport {
        operation: Operation,
        status: Option<u16>,
        detail: String,
    },

    #[error("{operation} returned an undecodable body: {detail}")]
    Decode { operation: Operation, detail: String },

    #[error("job {id} failed: {message}")]
    JobFailed { id: String, message: String },

    #[error("job {id} finished without producing an image")]
    EmptyResult { id: String },

    #[error("job {id} still pending after {:.1}s ({attempts} polls)", .waited.as_secs_f64())]
    Timeout {
        id: String,
        waited: Duration,
        attempts: u32,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: Operation },

    #[error("submit cancelled after job {id} was accepted")]
    CancelledAfterSubmit { id: String },

    #[error(transparent)]
    Format(#[from] ConvertError),
}

impl HordeError {
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Transport { operation, .. }
            | Self::Decode { operation, .. }
            | Self::Cancelled { operation } => Some(*operation),
            Self::CancelledAfterSubmit { .. } => Some(Operation::Submit),
            Self::JobFailed { .. } | Self::EmptyResult { .. } | Self::Timeout { .. } => {
                Some(Operation::Wait)
            }
            Self::Validation(_) | Self::Format(_) => None,
        }
    }

    /// True when the service itself reported the job as finished (failed or
    /// empty), as opposed to the client giving up on it.
    pub fn is_terminal_job_state(&self) -> bool {
        matches!(self, Self::JobFailed { .. } | Self::EmptyResult { .. })
    }

    /// True when the client abandoned a job the service may still be working on.
    pub fn is_abandoned_wait(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::CancelledAfterSubmit { .. }
                | Self::Cancelled {
                    operation: Operation::CheckStatus | Operation::Wait,
                }
        )
    }

    /// The job this error is about, when the error itself names one.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobFailed { id, .. }
            | Self::EmptyResult { id }
            | Self::Timeout { id, .. }
            | Self::CancelledAfterSubmit { id } => Some(id),
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("no input file specified")]
    EmptyPath,
    #[error("{} is already a png; refusing to convert it onto itself", .path.display())]
    AlreadyPng { path: PathBuf },
    #[error("failed reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed decoding {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed encoding png: {source}")]
    Encode {
        #[source]
        source: image::ImageError,
    },
    #[error("failed writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

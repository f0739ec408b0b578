mod request;
mod status;

pub use request::{
    GenerationDefaults, GenerationParams, GenerationRequest, ValidationError, DEFAULT_HEIGHT,
    DEFAULT_MIN_PROMPT_CHARS, DEFAULT_MODEL, DEFAULT_STEPS, DEFAULT_WIDTH,
};
pub use status::{Generation, JobPhase, JobStatus, StatusEndpoint, SubmissionResult};

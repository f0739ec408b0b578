use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_STEPS: u32 = 30;
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_MODEL: &str = "stable_diffusion_2.1";
pub const DEFAULT_MIN_PROMPT_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("prompt must be at least {min} characters (got {actual})")]
    PromptTooShort { min: usize, actual: usize },
    #[error("job id must not be empty")]
    EmptyJobId,
}

/// Values applied to a [`GenerationRequest`] wherever the caller left a zero
/// or empty field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationDefaults {
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub min_prompt_chars: usize,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            model: DEFAULT_MODEL.to_string(),
            min_prompt_chars: DEFAULT_MIN_PROMPT_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenerationParams {
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "model")]
    pub model_name: String,
}

/// Body of `POST /generate/async`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.params.steps = steps;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.params.width = width;
        self.params.height = height;
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.params.model_name = model_name.into();
        self
    }

    /// Returns the request that is actually sent: defaults filled in, prompt
    /// checked against the minimum length.
    pub fn resolve(&self, defaults: &GenerationDefaults) -> Result<Self, ValidationError> {
        let prompt = self.prompt.trim();
        let actual = prompt.chars().count();
        if actual == 0 || actual < defaults.min_prompt_chars {
            return Err(ValidationError::PromptTooShort {
                min: defaults.min_prompt_chars.max(1),
                actual,
            });
        }

        let model_name = match self.params.model_name.trim() {
            "" => defaults.model.trim().to_string(),
            name => name.to_string(),
        };
        let model_name = if model_name.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            model_name
        };

        Ok(Self {
            prompt: prompt.to_string(),
            params: GenerationParams {
                steps: non_zero_or(self.params.steps, defaults.steps, DEFAULT_STEPS),
                width: non_zero_or(self.params.width, defaults.width, DEFAULT_WIDTH),
                height: non_zero_or(self.params.height, defaults.height, DEFAULT_HEIGHT),
                model_name,
            },
        })
    }
}

fn non_zero_or(value: u32, default: u32, fallback: u32) -> u32 {
    match (value, default) {
        (0, 0) => fallback,
        (0, default) => default,
        (value, _) => value,
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use horde_contracts::events::{EventWriter, JobEvent};
use horde_contracts::jobs::{
    GenerationRequest, DEFAULT_HEIGHT, DEFAULT_MODEL, DEFAULT_STEPS, DEFAULT_WIDTH,
};
use horde_engine::{convert_to_archival, CancelToken, ClientConfig, HordeClient};
use log::{info, warn};
use uuid::Uuid;

const API_KEY_ENV: &str = "HORDE_API_KEY";
const API_BASE_ENV: &str = "HORDE_API_BASE";
const REQUEST_TIMEOUT_ENV: &str = "HORDE_REQUEST_TIMEOUT";
const POLL_TIMEOUT_ENV: &str = "HORDE_POLL_TIMEOUT";

const REQUEST_TIMEOUT_SECS_MIN: u64 = 1;
const REQUEST_TIMEOUT_SECS_MAX: u64 = 300;
const POLL_TIMEOUT_SECS_MIN: u64 = 10;
const POLL_TIMEOUT_SECS_MAX: u64 = 6 * 60 * 60;

#[derive(Debug, Parser)]
#[command(
    name = "horde",
    version,
    about = "Generate an image on the Stable Horde and save it locally"
)]
struct Cli {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value_t = DEFAULT_STEPS)]
    steps: u32,
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: u32,
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: u32,
    #[arg(long, visible_alias = "modelname", default_value = DEFAULT_MODEL)]
    model_name: String,
    /// Also write a PNG copy next to the downloaded WebP.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    png: bool,
    #[arg(long, default_value = "image.webp")]
    output: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Overrides HORDE_POLL_TIMEOUT.
    #[arg(long)]
    max_wait_secs: Option<u64>,
    /// Overrides HORDE_API_BASE.
    #[arg(long)]
    api_base: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("horde error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings = EnvSettings::from_lookup(|name| env::var(name).ok())?;
    let config = client_config(&cli, settings);
    let request = GenerationRequest::new(cli.prompt.clone())
        .with_steps(cli.steps)
        .with_size(cli.width, cli.height)
        .with_model(cli.model_name.clone());

    let events = cli
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, Uuid::new_v4().to_string()));
    let mut client = HordeClient::new(config).context("failed to build HTTP client")?;
    if let Some(events) = events.clone() {
        info!(
            "recording events to {} (session {})",
            events.path().display(),
            events.session_id()
        );
        client = client.with_events(events);
    }

    // Nothing flips this token; an interrupted run exits without cancelling
    // the job remotely.
    let generated = client.generate_image(&request, &CancelToken::new())?;
    write_output(&cli.output, &generated.bytes)?;
    info!(
        "saved job {} to {} ({} kudos)",
        generated.job_id,
        cli.output.display(),
        generated.kudos
    );

    let mut saved = cli.output.clone();
    if cli.png {
        let png = convert_to_archival(&cli.output)
            .with_context(|| format!("failed converting {} to png", cli.output.display()))?;
        if let Some(events) = events.as_ref() {
            let converted = JobEvent::ImageConverted {
                job_id: generated.job_id.clone(),
                input: cli.output.clone(),
                output: png.clone(),
            };
            if let Err(err) = events.record(converted) {
                warn!("failed to record image_converted event: {err:#}");
            }
        }
        saved = png;
    }
    println!("{}", saved.display());
    Ok(0)
}

/// Connection settings read from `HORDE_*` environment variables. Blank
/// values count as unset; numeric values are clamped to sane bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EnvSettings {
    api_key: String,
    api_base: Option<String>,
    request_timeout: Option<Duration>,
    poll_timeout: Option<Duration>,
}

impl EnvSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let Some(api_key) = non_empty(lookup(API_KEY_ENV)) else {
            bail!("{API_KEY_ENV} is not set; a Stable Horde API key is required");
        };
        Ok(Self {
            api_key,
            api_base: non_empty(lookup(API_BASE_ENV)),
            request_timeout: clamped_secs(
                lookup(REQUEST_TIMEOUT_ENV),
                REQUEST_TIMEOUT_SECS_MIN,
                REQUEST_TIMEOUT_SECS_MAX,
            ),
            poll_timeout: clamped_secs(
                lookup(POLL_TIMEOUT_ENV),
                POLL_TIMEOUT_SECS_MIN,
                POLL_TIMEOUT_SECS_MAX,
            ),
        })
    }
}

fn client_config(cli: &Cli, settings: EnvSettings) -> ClientConfig {
    let mut config = ClientConfig::new(settings.api_key);
    if let Some(base) = cli.api_base.as_deref().or(settings.api_base.as_deref()) {
        config = config.with_base_url(base);
    }
    if let Some(timeout) = settings.request_timeout {
        config = config.with_request_timeout(timeout);
    }
    let max_wait = cli
        .max_wait_secs
        .map(|secs| Duration::from_secs(secs.clamp(POLL_TIMEOUT_SECS_MIN, POLL_TIMEOUT_SECS_MAX)))
        .or(settings.poll_timeout);
    if let Some(max_wait) = max_wait {
        config = config.with_max_wait(max_wait);
    }
    config
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn clamped_secs(raw: Option<String>, min: u64, max: u64) -> Option<Duration> {
    non_empty(raw)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .map(|secs| Duration::from_secs_f64(secs.clamp(min as f64, max as f64)))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed writing {}", path.display()))
}

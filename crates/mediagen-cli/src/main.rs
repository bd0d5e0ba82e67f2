use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mediagen_contracts::{EventLog, InterfaceMode, PlatformId, PlatformRegistry};
use mediagen_engine::config::poll_interval_from_secs;
use mediagen_engine::{BatchErrorPolicy, Engine, InvocationRequest};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mediagen", version, about = "Uniform media generation across platforms")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List supported platforms and their credential variables.
    Platforms,
    /// List models, optionally for one platform.
    Models(ModelsArgs),
    /// Run one invocation and print the normalized result.
    Run(RunArgs),
    /// Run a JSON array of invocations in order.
    Batch(BatchArgs),
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    platform: Option<String>,
}

#[derive(Debug, Clone, Parser)]
struct TimingArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, value_parser = positive_seconds)]
    poll_interval: Option<f64>,
    #[arg(long, value_parser = positive_seconds)]
    max_wait: Option<f64>,
    #[arg(long, value_parser = positive_seconds)]
    sync_timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    platform: String,
    #[arg(long)]
    model: String,
    #[arg(long, default_value = "async")]
    mode: InterfaceMode,
    /// `key=value`; values that parse as JSON keep their type.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
    #[arg(long)]
    params_file: Option<PathBuf>,
    #[command(flatten)]
    timing: TimingArgs,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    continue_on_error: bool,
    #[command(flatten)]
    timing: TimingArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mediagen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Command::Platforms => run_platforms(),
        Command::Models(args) => run_models(args),
        Command::Run(args) => block_on(run_invocation(args)),
        Command::Batch(args) => block_on(run_batch(args)),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mediagen=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn block_on<F>(future: F) -> Result<i32>
where
    F: std::future::Future<Output = Result<i32>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(future)
}

fn run_platforms() -> Result<i32> {
    let engine = Engine::from_env();
    let platforms = engine
        .registry()
        .platforms()
        .iter()
        .map(|platform| {
            json!({
                "id": platform.id,
                "display_name": platform.display_name,
                "credential_env": platform.credential.env_vars,
                "models": platform.models.list().map(|model| model.name.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<Value>>();
    print_json(&Value::Array(platforms))?;
    Ok(0)
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    let engine = Engine::from_env();
    let wanted = args
        .platform
        .as_deref()
        .map(|raw| resolve_platform(engine.registry(), raw))
        .transpose()?;
    let mut rows = Vec::new();
    for platform in engine.registry().platforms() {
        if wanted.is_some_and(|wanted| wanted != platform.id) {
            continue;
        }
        for model in platform.models.list() {
            rows.push(json!({
                "platform": platform.id,
                "model": model.name,
                "display_name": model.display_name,
                "media": model.media,
                "modes": model.modes(),
                "endpoint": model.endpoint,
            }));
        }
    }
    print_json(&Value::Array(rows))?;
    Ok(0)
}

async fn run_invocation(args: RunArgs) -> Result<i32> {
    let mut params = match args.params_file.as_deref() {
        Some(path) => read_params_file(path)?,
        None => Map::new(),
    };
    for (key, value) in args.params {
        params.insert(key, value);
    }
    let engine = build_engine(&args.timing);
    let platform = resolve_platform(engine.registry(), &args.platform)?;
    let request = InvocationRequest::new(platform, args.model, args.mode).with_params(params);

    let cancel = cancel_on_ctrl_c();
    let result = engine.invoke_with_cancel(&request, cancel).await?;
    print_json(&serde_json::to_value(&result)?)?;
    Ok(0)
}

async fn run_batch(args: BatchArgs) -> Result<i32> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let items: Vec<InvocationRequest> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array of invocations", args.file.display()))?;
    let policy = if args.continue_on_error {
        BatchErrorPolicy::Continue
    } else {
        BatchErrorPolicy::Abort
    };

    let engine = build_engine(&args.timing);
    let cancel = cancel_on_ctrl_c();
    let outcomes = engine.invoke_batch(items, policy, cancel).await?;
    let failed = outcomes.iter().filter(|outcome| outcome.is_failed()).count();
    print_json(&Value::Array(
        outcomes.iter().map(|outcome| outcome.to_value()).collect(),
    ))?;
    Ok(if failed == 0 { 0 } else { 2 })
}

fn build_engine(timing: &TimingArgs) -> Engine {
    let mut engine = Engine::from_env();
    let config = engine.config_mut();
    if let Some(seconds) = timing.poll_interval {
        config.poll.interval = poll_interval_from_secs(seconds);
    }
    if let Some(seconds) = timing.max_wait {
        config.poll.max_wait = Some(Duration::from_secs_f64(seconds));
    }
    if let Some(seconds) = timing.sync_timeout {
        config.sync_timeout = Duration::from_secs_f64(seconds);
    }
    match timing.events.as_ref() {
        Some(path) => {
            let log = EventLog::new(path);
            info!(path = %log.path().display(), "appending invocation events");
            engine.with_events(log)
        }
        None => engine,
    }
}

fn resolve_platform(registry: &PlatformRegistry, raw: &str) -> Result<PlatformId> {
    let spec = registry
        .resolve(raw)
        .with_context(|| format!("known platforms: {}", registry.list().join(", ")))?;
    Ok(spec.id)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, canceling");
            trigger.cancel();
        }
    });
    cancel
}

fn read_params_file(path: &Path) -> Result<Map<String, Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?
    {
        Value::Object(params) => Ok(params),
        _ => bail!("{} must hold a JSON object", path.display()),
    }
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("parameter name is empty in '{raw}'");
    }
    let value = serde_json::from_str::<Value>(value)
        .ok()
        .filter(|parsed| !parsed.is_object() && !parsed.is_array())
        .unwrap_or_else(|| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn positive_seconds(raw: &str) -> Result<f64> {
    let value = raw
        .trim()
        .parse::<f64>()
        .with_context(|| format!("'{raw}' is not a number of seconds"))?;
    if !value.is_finite() || value <= 0.0 {
        bail!("seconds must be positive, got '{raw}'");
    }
    Ok(value)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

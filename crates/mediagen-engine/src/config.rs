use std::env;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll cadence and optional overall bound for the asynchronous strategy.
///
/// `max_wait: None` keeps polling until the vendor reports a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub replicate_api_base: String,
    pub fal_api_base: String,
    pub fal_queue_base: String,
    pub genbo_api_base: String,
    pub poll: PollOptions,
    pub sync_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replicate_api_base: "https://api.replicate.com/v1".to_string(),
            fal_api_base: "https://fal.run".to_string(),
            fal_queue_base: "https://queue.fal.run".to_string(),
            genbo_api_base: "https://api.genbo.ai/v1".to_string(),
            poll: PollOptions::default(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let base = |key: &str, default: String| {
            lookup(key)
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };
        let seconds = |key: &str| {
            lookup(key)
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value > 0.0)
        };

        Self {
            replicate_api_base: base("REPLICATE_API_BASE", defaults.replicate_api_base),
            fal_api_base: base("FAL_API_BASE", defaults.fal_api_base),
            fal_queue_base: base("FAL_QUEUE_BASE", defaults.fal_queue_base),
            genbo_api_base: base("GENBO_API_BASE", defaults.genbo_api_base),
            poll: PollOptions {
                interval: seconds("MEDIAGEN_POLL_INTERVAL")
                    .map(poll_interval_from_secs)
                    .unwrap_or(defaults.poll.interval),
                max_wait: seconds("MEDIAGEN_MAX_WAIT").map(Duration::from_secs_f64),
            },
            sync_timeout: seconds("MEDIAGEN_SYNC_TIMEOUT")
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.sync_timeout),
        }
    }
}

pub fn poll_interval_from_secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.clamp(0.1, 60.0))
}

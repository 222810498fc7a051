use std::env;
use std::net::IpAddr;
use std::time::Duration;

use crate::models::Viewport;

/// Viewport every run and teach session uses. Agent coordinates are
/// denormalized against these dimensions.
pub const RUNNER_VIEWPORT: Viewport = Viewport {
    width: 1440,
    height: 900,
};

/// Upper bound of the normalized coordinate grid the agent speaks.
pub const NORMALIZED_RANGE: f64 = 999.0;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Plan-runner tunables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_turns_per_step: u32,
    pub checkpoint_threshold: f64,
    pub embedded_frame_timeout: Duration,
    pub default_search_url: String,
    pub viewport: Viewport,
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        Self {
            max_turns_per_step: env_parse("RUNNER_MAX_TURNS", 4u32),
            checkpoint_threshold: env_parse("RUNNER_CHECKPOINT_THRESHOLD", 0.88f64),
            embedded_frame_timeout: Duration::from_secs_f64(env_parse(
                "RUNNER_EMBEDDED_FRAME_TIMEOUT",
                20.0f64,
            )),
            default_search_url: env::var("RUNNER_DEFAULT_SEARCH_URL")
                .unwrap_or_else(|_| "https://www.google.com/".to_string()),
            viewport: RUNNER_VIEWPORT,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_turns_per_step: 4,
            checkpoint_threshold: 0.88,
            embedded_frame_timeout: Duration::from_secs(20),
            default_search_url: "https://www.google.com/".to_string(),
            viewport: RUNNER_VIEWPORT,
        }
    }
}

/// Teach-session tunables.
#[derive(Debug, Clone)]
pub struct TeachConfig {
    pub frame_interval: Duration,
    pub max_frames: usize,
}

impl TeachConfig {
    pub fn from_env() -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(env_parse(
                "TEACH_FRAME_INTERVAL_SECONDS",
                1.0f64,
            )),
            max_frames: env_parse("TEACH_MAX_FRAMES", 360usize),
        }
    }
}

impl Default for TeachConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs(1),
            max_frames: 360,
        }
    }
}

/// Retention of finished runs in the registry.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub completed_run_ttl: Duration,
    pub sweep_interval: Duration,
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        Self {
            completed_run_ttl: Duration::from_secs(env_parse("RUN_COMPLETED_TTL_SECONDS", 300u64)),
            sweep_interval: Duration::from_secs(env_parse("RUN_SWEEP_INTERVAL_SECONDS", 60u64)),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_run_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Computer-use agent wiring.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub debug: bool,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        let enabled_flag = env::var("COMPUTER_USE_ENABLED").as_deref() == Ok("1");
        if enabled_flag && api_key.is_none() {
            tracing::warn!("COMPUTER_USE_ENABLED=1 but GEMINI_API_KEY unset; agent disabled");
        }
        Self {
            enabled: enabled_flag && api_key.is_some(),
            api_key,
            model: env::var("COMPUTER_USE_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-computer-use-preview-10-2025".to_string()),
            debug: env::var("COMPUTER_USE_DEBUG").as_deref() == Ok("1"),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: "gemini-2.5-computer-use-preview-10-2025".to_string(),
            debug: false,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub runner: RunnerConfig,
    pub teach: TeachConfig,
    pub retention: RetentionConfig,
    pub agent: AgentConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| "127.0.0.1".parse().unwrap()),
            port: env_parse("PORT", 8765u16),
            runner: RunnerConfig::from_env(),
            teach: TeachConfig::from_env(),
            retention: RetentionConfig::from_env(),
            agent: AgentConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".parse().unwrap(),
            port: 8765,
            runner: RunnerConfig::default(),
            teach: TeachConfig::default(),
            retention: RetentionConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

//! Configuration tree, loaded from `config.toml`.
//!
//! Every knob has a default so an empty file (or no file) yields a working
//! core. Unknown enum values are rejected by serde, never coerced.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::TaskKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub upstreams: UpstreamsConfig,
    #[serde(default)]
    pub interventions: InterventionConfig,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Load from a file path; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        Self::from_toml_str(&raw)
    }

    /// Sanity-check the tree. Issues are warnings unless marked as errors.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port must be non-zero"));
        }
        for kind in TaskKind::ALL {
            let cfg = self.pool.for_kind(kind);
            if cfg.max_concurrency == 0 {
                issues.push(ConfigIssue::error(format!(
                    "pool.{kind}.max_concurrency must be at least 1"
                )));
            }
            if cfg.max_queue_depth == 0 {
                issues.push(ConfigIssue::error(format!(
                    "pool.{kind}.max_queue_depth must be at least 1"
                )));
            }
        }
        for (name, upstream) in self.upstreams.all() {
            if upstream.base_url.is_empty() {
                issues.push(ConfigIssue::warning(format!(
                    "upstreams.{name}.base_url is empty — calls to it will fail"
                )));
            }
            if upstream.failure_threshold == 0 {
                issues.push(ConfigIssue::error(format!(
                    "upstreams.{name}.failure_threshold must be at least 1"
                )));
            }
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8080")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Env var holding the API bearer token. Unset/empty = dev mode.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".into(),
            api_token_env: d_token_env(),
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long terminal tasks are retained before the sweeper removes them.
    #[serde(default = "d_86400")]
    pub task_ttl_secs: u64,
    /// Sweep cadence.
    #[serde(default = "d_60")]
    pub sweep_interval_secs: u64,
    /// Maximum events returned by one `events_since` page.
    #[serde(default = "d_500")]
    pub events_page_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            task_ttl_secs: 86_400,
            sweep_interval_secs: 60,
            events_page_limit: 500,
        }
    }
}

impl RegistryConfig {
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-kind execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindConfig {
    pub max_concurrency: usize,
    pub max_queue_depth: usize,
    pub job_timeout_secs: u64,
    pub retries: u32,
}

impl KindConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    fn defaults_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Lesson => Self {
                max_concurrency: 8,
                max_queue_depth: 64,
                job_timeout_secs: 600,
                retries: 2,
            },
            TaskKind::Simulation => Self {
                max_concurrency: 4,
                max_queue_depth: 32,
                job_timeout_secs: 900,
                retries: 1,
            },
            TaskKind::Intervention => Self {
                max_concurrency: 16,
                max_queue_depth: 128,
                job_timeout_secs: 120,
                retries: 3,
            },
            TaskKind::Tts => Self {
                max_concurrency: 8,
                max_queue_depth: 64,
                job_timeout_secs: 60,
                retries: 2,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Overrides by kind; unspecified kinds get their documented defaults.
    #[serde(default)]
    pub lesson: Option<KindConfig>,
    #[serde(default)]
    pub simulation: Option<KindConfig>,
    #[serde(default)]
    pub intervention: Option<KindConfig>,
    #[serde(default)]
    pub tts: Option<KindConfig>,
    /// Grace period for draining in-flight jobs on shutdown.
    #[serde(default = "d_30")]
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lesson: None,
            simulation: None,
            intervention: None,
            tts: None,
            shutdown_grace_secs: 30,
        }
    }
}

impl PoolConfig {
    pub fn for_kind(&self, kind: TaskKind) -> KindConfig {
        let override_cfg = match kind {
            TaskKind::Lesson => &self.lesson,
            TaskKind::Simulation => &self.simulation,
            TaskKind::Intervention => &self.intervention,
            TaskKind::Tts => &self.tts,
        };
        override_cfg
            .clone()
            .unwrap_or_else(|| KindConfig::defaults_for(kind))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection, retry, and breaker settings for one external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "d_2000")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_30000")]
    pub overall_timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
    #[serde(default = "d_5")]
    pub failure_threshold: u32,
    #[serde(default = "d_30000")]
    pub open_duration_ms: u64,
    #[serde(default = "d_1")]
    pub half_open_probe_limit: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout_ms: 2_000,
            overall_timeout_ms: 30_000,
            max_retries: 3,
            failure_threshold: 5,
            open_duration_ms: 30_000,
            half_open_probe_limit: 1,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn with_timeout(base_url: &str, overall_timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.into(),
            overall_timeout_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    #[serde(default = "d_knowledge")]
    pub knowledge: UpstreamConfig,
    #[serde(default = "d_encyclopedia")]
    pub encyclopedia: UpstreamConfig,
    #[serde(default = "d_tutoring")]
    pub tutoring: UpstreamConfig,
    #[serde(default = "d_tts")]
    pub tts: UpstreamConfig,
    #[serde(default = "d_simulation")]
    pub simulation: UpstreamConfig,
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            knowledge: d_knowledge(),
            encyclopedia: d_encyclopedia(),
            tutoring: d_tutoring(),
            tts: d_tts(),
            simulation: d_simulation(),
        }
    }
}

impl UpstreamsConfig {
    pub fn all(&self) -> [(&'static str, &UpstreamConfig); 5] {
        [
            ("knowledge", &self.knowledge),
            ("encyclopedia", &self.encyclopedia),
            ("tutoring", &self.tutoring),
            ("tts", &self.tts),
            ("simulation", &self.simulation),
        ]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interventions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionConfig {
    /// Dedup window for `low_recent_score`, per (user, subject, topic).
    #[serde(default = "d_24")]
    pub low_score_window_hours: u64,
    /// Dedup window for `declining_trend`, per (user, subject).
    #[serde(default = "d_24")]
    pub trend_window_hours: u64,
    /// Dedup window for `inactivity`, per user.
    #[serde(default = "d_7")]
    pub inactivity_window_days: u64,
    /// Days without any event before `inactivity` fires.
    #[serde(default = "d_7")]
    pub inactivity_after_days: u64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            low_score_window_hours: 24,
            trend_window_hours: 24,
            inactivity_window_days: 7,
            inactivity_after_days: 7,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_8080() -> u16 {
    8080
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "GURU_API_TOKEN".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://127.0.0.1:3000".into(),
    ]
}
fn d_86400() -> u64 {
    86_400
}
fn d_500() -> usize {
    500
}
fn d_60() -> u64 {
    60
}
fn d_30() -> u64 {
    30
}
fn d_2000() -> u64 {
    2_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_1() -> u32 {
    1
}
fn d_24() -> u64 {
    24
}
fn d_7() -> u64 {
    7
}
fn d_knowledge() -> UpstreamConfig {
    // Lesson-feeding endpoints get minutes, not the 30 s default.
    UpstreamConfig::with_timeout("http://127.0.0.1:8001", 120_000)
}
fn d_encyclopedia() -> UpstreamConfig {
    UpstreamConfig::with_base_url("http://127.0.0.1:8002")
}
fn d_tutoring() -> UpstreamConfig {
    UpstreamConfig::with_base_url("http://127.0.0.1:8003")
}
fn d_tts() -> UpstreamConfig {
    UpstreamConfig::with_base_url("http://127.0.0.1:8004")
}
fn d_simulation() -> UpstreamConfig {
    UpstreamConfig::with_timeout("http://127.0.0.1:8005", 120_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.registry.task_ttl_secs, 86_400);
        assert_eq!(cfg.pool.for_kind(TaskKind::Lesson).max_concurrency, 8);
        assert_eq!(cfg.upstreams.knowledge.failure_threshold, 5);
    }

    #[test]
    fn kind_defaults_match_documented_table() {
        let pool = PoolConfig::default();
        let lesson = pool.for_kind(TaskKind::Lesson);
        assert_eq!(
            (lesson.max_concurrency, lesson.max_queue_depth, lesson.job_timeout_secs, lesson.retries),
            (8, 64, 600, 2)
        );
        let sim = pool.for_kind(TaskKind::Simulation);
        assert_eq!(
            (sim.max_concurrency, sim.max_queue_depth, sim.job_timeout_secs, sim.retries),
            (4, 32, 900, 1)
        );
        let iv = pool.for_kind(TaskKind::Intervention);
        assert_eq!(
            (iv.max_concurrency, iv.max_queue_depth, iv.job_timeout_secs, iv.retries),
            (16, 128, 120, 3)
        );
        let tts = pool.for_kind(TaskKind::Tts);
        assert_eq!(
            (tts.max_concurrency, tts.max_queue_depth, tts.job_timeout_secs, tts.retries),
            (8, 64, 60, 2)
        );
    }

    #[test]
    fn per_kind_override_parses() {
        let cfg = Config::from_toml_str(
            r#"
            [pool.lesson]
            max_concurrency = 2
            max_queue_depth = 4
            job_timeout_secs = 30
            retries = 0
            "#,
        )
        .unwrap();
        let lesson = cfg.pool.for_kind(TaskKind::Lesson);
        assert_eq!(lesson.max_concurrency, 2);
        assert_eq!(lesson.max_queue_depth, 4);
        // Other kinds keep their defaults.
        assert_eq!(cfg.pool.for_kind(TaskKind::Tts).max_concurrency, 8);
    }

    #[test]
    fn upstream_override_parses() {
        let cfg = Config::from_toml_str(
            r#"
            [upstreams.knowledge]
            base_url = "http://kb.internal:9000"
            failure_threshold = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.upstreams.knowledge.base_url, "http://kb.internal:9000");
        assert_eq!(cfg.upstreams.knowledge.failure_threshold, 2);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.upstreams.knowledge.connect_timeout_ms, 2_000);
    }

    #[test]
    fn validate_flags_zero_concurrency() {
        let cfg = Config::from_toml_str(
            r#"
            [pool.tts]
            max_concurrency = 0
            max_queue_depth = 4
            job_timeout_secs = 30
            retries = 0
            "#,
        )
        .unwrap();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("tts")));
    }
}

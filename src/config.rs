//! Engine configuration.
//!
//! Defaults are compiled in; every knob can be overridden through the
//! environment (`CONTEXT_ENGINE_*`). Durations are expressed in seconds in
//! both serialized form and the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

mod duration_secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        secs.map(|s| {
            if !s.is_finite() || s < 0.0 {
                Err(serde::de::Error::custom("duration must be a non-negative number of seconds"))
            } else {
                Ok(Duration::from_secs_f64(s))
            }
        })
        .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub service_port: u16,

    pub graph_endpoint: String,
    #[serde(with = "duration_secs")]
    pub graph_timeout: Duration,
    pub graph_max_retries: u32,
    #[serde(with = "duration_secs")]
    pub graph_retry_base: Duration,

    pub breaker_failure_threshold: usize,
    #[serde(with = "duration_secs")]
    pub breaker_open_duration: Duration,

    pub memory_cache_capacity: usize,
    #[serde(with = "duration_secs")]
    pub memory_cache_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub active_case_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub closed_case_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub cache_sweep_interval: Duration,

    #[serde(with = "duration_secs")]
    pub build_overall_deadline: Duration,
    /// `None` inherits the overall deadline.
    #[serde(default, with = "duration_secs_opt", skip_serializing_if = "Option::is_none")]
    pub per_dimension_deadline: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub metadata_fetch_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub scoring_budget: Duration,

    pub enable_memory_cache: bool,
    pub enable_persistent_cache: bool,

    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_port: 8015,
            graph_endpoint: "http://127.0.0.1:8010".into(),
            graph_timeout: Duration::from_secs(20),
            graph_max_retries: 3,
            graph_retry_base: Duration::from_secs(1),
            breaker_failure_threshold: 5,
            breaker_open_duration: Duration::from_secs(60),
            memory_cache_capacity: 1000,
            memory_cache_ttl: Duration::from_secs(600),
            active_case_ttl: Duration::from_secs(3600),
            closed_case_ttl: Duration::from_secs(86_400),
            cache_sweep_interval: Duration::from_secs(60),
            build_overall_deadline: Duration::from_secs(30),
            per_dimension_deadline: None,
            metadata_fetch_timeout: Duration::from_secs(3),
            scoring_budget: Duration::from_millis(100),
            enable_memory_cache: true,
            enable_persistent_cache: false,
            max_batch_size: 50,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<f64>(key).filter(|s| s.is_finite() && *s >= 0.0).map(Duration::from_secs_f64)
}

impl EngineConfig {
    /// Defaults overlaid with any `CONTEXT_ENGINE_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("CONTEXT_ENGINE_PORT") {
            cfg.service_port = v;
        }
        if let Ok(v) = env::var("CONTEXT_ENGINE_GRAPH_ENDPOINT") {
            cfg.graph_endpoint = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_GRAPH_TIMEOUT_SECS") {
            cfg.graph_timeout = v;
        }
        if let Some(v) = env_parse("CONTEXT_ENGINE_GRAPH_MAX_RETRIES") {
            cfg.graph_max_retries = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_GRAPH_RETRY_BASE_SECS") {
            cfg.graph_retry_base = v;
        }
        if let Some(v) = env_parse("CONTEXT_ENGINE_BREAKER_FAILURE_THRESHOLD") {
            cfg.breaker_failure_threshold = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_BREAKER_OPEN_SECS") {
            cfg.breaker_open_duration = v;
        }
        if let Some(v) = env_parse("CONTEXT_ENGINE_MEMORY_CACHE_CAPACITY") {
            cfg.memory_cache_capacity = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_MEMORY_CACHE_TTL_SECS") {
            cfg.memory_cache_ttl = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_ACTIVE_CASE_TTL_SECS") {
            cfg.active_case_ttl = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_CLOSED_CASE_TTL_SECS") {
            cfg.closed_case_ttl = v;
        }
        if let Some(v) = env_secs("CONTEXT_ENGINE_BUILD_DEADLINE_SECS") {
            cfg.build_overall_deadline = v;
        }
        if let Some(v) = env_parse("CONTEXT_ENGINE_ENABLE_MEMORY_CACHE") {
            cfg.enable_memory_cache = v;
        }
        if let Some(v) = env_parse("CONTEXT_ENGINE_ENABLE_PERSISTENT_CACHE") {
            cfg.enable_persistent_cache = v;
        }
        if let Some(v) = env_parse("CONTEXT_ENGINE_MAX_BATCH_SIZE") {
            cfg.max_batch_size = v;
        }
        cfg
    }
}

//! Pool, group and scheduler configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::serde::{PostExecutePolicy, Priority};

/// Default idle timeout after which a surplus worker thread retires.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

fn default_max_worker_threads() -> usize {
    num_cpus::get().saturating_mul(2).max(1)
}

/// Thread pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name used in logs and worker thread names. A unique name is
    /// generated when unset.
    pub name: Option<String>,
    /// Worker threads kept alive even when idle.
    pub min_worker_threads: usize,
    /// Upper bound on worker threads.
    pub max_worker_threads: usize,
    /// How long an idle worker waits for work before it may retire.
    pub idle_timeout_ms: u64,
    /// Queue submissions but spawn no threads until `start` is called.
    pub start_suspended: bool,
    /// Priority for submissions that do not set one.
    pub default_priority: Priority,
    /// Post-execute policy for submissions that do not set one.
    pub default_post_execute_policy: PostExecutePolicy,
    /// Worker thread name prefix; the pool name is used when unset.
    pub thread_name_prefix: Option<String>,
    /// Worker thread stack size in bytes; platform default when unset.
    pub thread_stack_size: Option<usize>,
    /// OS scheduling priority for worker threads; inherited when unset.
    /// Applied on a best-effort basis: a platform or privilege refusal is
    /// logged and the worker keeps the inherited priority.
    pub thread_priority: Option<Priority>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: None,
            min_worker_threads: 0,
            max_worker_threads: default_max_worker_threads(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            start_suspended: false,
            default_priority: Priority::Normal,
            default_post_execute_policy: PostExecutePolicy::Always,
            thread_name_prefix: None,
            thread_stack_size: None,
            thread_priority: None,
        }
    }
}

impl PoolConfig {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the minimum number of worker threads.
    #[must_use]
    pub const fn with_min_threads(mut self, min: usize) -> Self {
        self.min_worker_threads = min;
        self
    }

    /// Set the maximum number of worker threads.
    #[must_use]
    pub const fn with_max_threads(mut self, max: usize) -> Self {
        self.max_worker_threads = max;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Create the pool suspended.
    #[must_use]
    pub const fn with_start_suspended(mut self, suspended: bool) -> Self {
        self.start_suspended = suspended;
        self
    }

    /// Set the default submission priority.
    #[must_use]
    pub const fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    /// Set the default post-execute policy.
    #[must_use]
    pub const fn with_post_execute_policy(mut self, policy: PostExecutePolicy) -> Self {
        self.default_post_execute_policy = policy;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Set the OS scheduling priority of worker threads.
    #[must_use]
    pub const fn with_thread_priority(mut self, priority: Priority) -> Self {
        self.thread_priority = Some(priority);
        self
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_worker_threads == 0 {
            return Err("max_worker_threads must be greater than 0".into());
        }
        if self.min_worker_threads > self.max_worker_threads {
            return Err(format!(
                "min_worker_threads ({}) must not exceed max_worker_threads ({})",
                self.min_worker_threads, self.max_worker_threads
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err("idle_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        if self.name.as_deref().is_some_and(str::is_empty) {
            return Err("name must not be empty".into());
        }
        Ok(())
    }

    /// Parse a pool configuration from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from `POOL_*` environment variables, loading a
    /// `.env` file first when one exists.
    ///
    /// Recognized: `POOL_NAME`, `POOL_MIN_THREADS`, `POOL_MAX_THREADS`,
    /// `POOL_IDLE_TIMEOUT_MS`, `POOL_START_SUSPENDED`, `POOL_DEFAULT_PRIORITY`,
    /// `POOL_POST_EXECUTE_POLICY`, `POOL_THREAD_NAME_PREFIX`,
    /// `POOL_THREAD_STACK_SIZE`, `POOL_THREAD_PRIORITY`. Unset variables keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a
    /// validation error.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary `POOL_*` key lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))
        }

        let mut cfg = Self::default();
        if let Some(name) = lookup("POOL_NAME") {
            cfg.name = Some(name);
        }
        if let Some(raw) = lookup("POOL_MIN_THREADS") {
            cfg.min_worker_threads = parse("POOL_MIN_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("POOL_MAX_THREADS") {
            cfg.max_worker_threads = parse("POOL_MAX_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("POOL_IDLE_TIMEOUT_MS") {
            cfg.idle_timeout_ms = parse("POOL_IDLE_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("POOL_START_SUSPENDED") {
            cfg.start_suspended = parse("POOL_START_SUSPENDED", &raw)?;
        }
        if let Some(raw) = lookup("POOL_DEFAULT_PRIORITY") {
            cfg.default_priority = parse("POOL_DEFAULT_PRIORITY", &raw)?;
        }
        if let Some(raw) = lookup("POOL_POST_EXECUTE_POLICY") {
            cfg.default_post_execute_policy = parse("POOL_POST_EXECUTE_POLICY", &raw)?;
        }
        if let Some(prefix) = lookup("POOL_THREAD_NAME_PREFIX") {
            cfg.thread_name_prefix = Some(prefix);
        }
        if let Some(raw) = lookup("POOL_THREAD_STACK_SIZE") {
            cfg.thread_stack_size = Some(parse("POOL_THREAD_STACK_SIZE", &raw)?);
        }
        if let Some(raw) = lookup("POOL_THREAD_PRIORITY") {
            cfg.thread_priority = Some(parse("POOL_THREAD_PRIORITY", &raw)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Work items group configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Group name used in logs.
    pub name: Option<String>,
    /// Maximum items of the group occupying pool threads at once.
    pub concurrency: usize,
    /// Buffer submissions until `start` is called.
    pub start_suspended: bool,
    /// Default priority; falls back to the pool's default.
    pub default_priority: Option<Priority>,
    /// Default post-execute policy; falls back to the pool's default.
    pub default_post_execute_policy: Option<PostExecutePolicy>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            name: None,
            concurrency: 1,
            start_suspended: false,
            default_priority: None,
            default_post_execute_policy: None,
        }
    }
}

impl GroupConfig {
    /// Group configuration with the given concurrency.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    /// Set the group name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Create the group suspended.
    #[must_use]
    pub const fn with_start_suspended(mut self, suspended: bool) -> Self {
        self.start_suspended = suspended;
        self
    }

    /// Set the group's default priority.
    #[must_use]
    pub const fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = Some(priority);
        self
    }

    /// Set the group's default post-execute policy.
    #[must_use]
    pub const fn with_post_execute_policy(mut self, policy: PostExecutePolicy) -> Self {
        self.default_post_execute_policy = Some(policy);
        self
    }

    /// Validate group configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl SchedulerConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns the first invalid pool and why.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = PoolConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.max_worker_threads >= 1);
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.default_post_execute_policy, PostExecutePolicy::Always);
        assert!(GroupConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds() {
        let err = PoolConfig::new()
            .with_min_threads(5)
            .with_max_threads(2)
            .validate()
            .unwrap_err();
        assert!(err.contains("min_worker_threads"));

        assert!(PoolConfig::new().with_max_threads(0).validate().is_err());
        assert!(GroupConfig::new(0).validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("POOL_NAME", "ingest"),
            ("POOL_MIN_THREADS", "1"),
            ("POOL_MAX_THREADS", "3"),
            ("POOL_DEFAULT_PRIORITY", "above_normal"),
            ("POOL_POST_EXECUTE_POLICY", "when_canceled"),
            ("POOL_THREAD_PRIORITY", "below_normal"),
        ]
        .into_iter()
        .collect();

        let cfg = PoolConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(cfg.name.as_deref(), Some("ingest"));
        assert_eq!(cfg.min_worker_threads, 1);
        assert_eq!(cfg.max_worker_threads, 3);
        assert_eq!(cfg.default_priority, Priority::AboveNormal);
        assert_eq!(cfg.default_post_execute_policy, PostExecutePolicy::WhenCanceled);
        assert_eq!(cfg.thread_priority, Some(Priority::BelowNormal));
    }

    #[test]
    fn test_from_lookup_reports_bad_value() {
        let err = PoolConfig::from_lookup(|key| {
            (key == "POOL_MAX_THREADS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.starts_with("POOL_MAX_THREADS"));
    }
}

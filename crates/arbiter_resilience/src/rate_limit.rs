//! Sliding-window rate limiting.
//!
//! The limiter keeps one window per scope: `"global"` for the whole runtime
//! and `"tool:{name}"` per tool. Admission is atomic per scope - the store
//! trims expired timestamps, counts, and inserts under a single lock, so two
//! concurrent callers can never both take the last slot.

use arbiter_core::{CoreResult, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Floor for admission-retry sleeps, to avoid busy-spinning on tiny hints
const MIN_RETRY_SLEEP: Duration = Duration::from_millis(10);

/// Limit for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls admitted per window
    pub limit: u64,
    /// Window length
    pub period: Duration,
}

impl RateLimitConfig {
    /// A limit of `limit` calls per `period`
    #[must_use]
    pub const fn new(limit: u64, period: Duration) -> Self {
        Self { limit, period }
    }

    /// Calls per second
    #[must_use]
    pub const fn per_second(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    /// Calls per minute
    #[must_use]
    pub const fn per_minute(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Outcome of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Slot taken, proceed
    Admitted,
    /// Window full; earliest slot frees after the given wait
    RetryAfter(Duration),
}

/// Whether a call would currently be admitted, per scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitStatus {
    /// Scope that would reject, if any
    pub blocked_scope: Option<String>,
    /// Wait hint from the rejecting scope
    pub retry_after: Option<Duration>,
}

impl LimitStatus {
    /// Whether the call would be admitted right now
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        self.blocked_scope.is_none()
    }
}

/// Point-in-time usage for one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeUsage {
    /// Scope key ("global" or "tool:{name}")
    pub scope: String,
    /// Slots consumed in the current window
    pub used: u64,
    /// Configured limit
    pub limit: u64,
    /// Slots remaining
    pub remaining: u64,
    /// Window length
    pub period: Duration,
}

/// Storage backend for sliding windows.
///
/// `try_acquire` must be atomic per key: trim, count, and insert happen
/// under one critical section.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Attempt to take a slot in `key`'s window
    async fn try_acquire(&self, key: &str, limit: u64, period: Duration) -> Admission;

    /// Current count in `key`'s window, after trimming
    async fn count(&self, key: &str, period: Duration) -> u64;

    /// Drop all state for `key`
    async fn reset(&self, key: &str);

    /// Drop all state
    async fn reset_all(&self);
}

/// In-process store backed by a timestamp deque per key
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn try_acquire(&self, key: &str, limit: u64, period: Duration) -> Admission {
        let now = Instant::now();
        let mut windows = self.lock();
        let window = windows.entry(key.to_string()).or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) >= period {
                window.pop_front();
            } else {
                break;
            }
        }

        if (window.len() as u64) < limit {
            window.push_back(now);
            Admission::Admitted
        } else {
            // earliest entry defines when the next slot frees
            let wait = window
                .front()
                .map_or(period, |front| period.saturating_sub(now.duration_since(*front)));
            Admission::RetryAfter(wait)
        }
    }

    async fn count(&self, key: &str, period: Duration) -> u64 {
        let now = Instant::now();
        let mut windows = self.lock();
        let Some(window) = windows.get_mut(key) else {
            return 0;
        };
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= period {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len() as u64
    }

    async fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    async fn reset_all(&self) {
        self.lock().clear();
    }
}

/// Sliding-window limiter with a global scope and per-tool scopes
pub struct SlidingWindowLimiter {
    store: Box<dyn RateLimitStore>,
    global: Option<RateLimitConfig>,
    per_tool: HashMap<String, RateLimitConfig>,
}

impl SlidingWindowLimiter {
    /// Create a limiter over the in-process store
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            global: None,
            per_tool: HashMap::new(),
        }
    }

    /// Create a limiter over a custom store
    #[must_use]
    pub fn with_store(store: Box<dyn RateLimitStore>) -> Self {
        Self {
            store,
            global: None,
            per_tool: HashMap::new(),
        }
    }

    /// Set the global limit
    #[must_use]
    pub fn with_global_limit(mut self, config: RateLimitConfig) -> Self {
        self.global = Some(config);
        self
    }

    /// Set a per-tool limit
    #[must_use]
    pub fn with_tool_limit(mut self, tool: impl Into<String>, config: RateLimitConfig) -> Self {
        self.per_tool.insert(tool.into(), config);
        self
    }

    fn tool_key(tool: &str) -> String {
        format!("tool:{tool}")
    }

    /// Take one slot for `tool` without waiting.
    ///
    /// The global scope is acquired before the tool scope. A tool-scope
    /// rejection does not return the global slot; the window trims it out
    /// as it expires.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::RateLimited`] naming the saturated scope.
    pub async fn try_acquire(&self, tool: &str) -> CoreResult<()> {
        if let Some(global) = &self.global {
            match self
                .store
                .try_acquire("global", global.limit, global.period)
                .await
            {
                Admission::Admitted => {}
                Admission::RetryAfter(wait) => {
                    return Err(ToolError::RateLimited {
                        scope: "global".to_string(),
                        limit: global.limit,
                        retry_after_ms: Some(wait.as_millis() as u64),
                    });
                }
            }
        }

        if let Some(config) = self.per_tool.get(tool) {
            let key = Self::tool_key(tool);
            match self
                .store
                .try_acquire(&key, config.limit, config.period)
                .await
            {
                Admission::Admitted => {}
                Admission::RetryAfter(wait) => {
                    return Err(ToolError::RateLimited {
                        scope: key,
                        limit: config.limit,
                        retry_after_ms: Some(wait.as_millis() as u64),
                    });
                }
            }
        }

        Ok(())
    }

    /// Take one slot for `tool`, sleeping until admitted or the deadline
    /// passes.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::RateLimited`] when `max_wait` elapses first.
    pub async fn acquire(&self, tool: &str, max_wait: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire(tool).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let hint = err
                        .retry_after_ms()
                        .map_or(MIN_RETRY_SLEEP, Duration::from_millis)
                        .max(MIN_RETRY_SLEEP);
                    if Instant::now() + hint > deadline {
                        return Err(err);
                    }
                    debug!(tool, wait_ms = hint.as_millis() as u64, "rate limited, waiting");
                    tokio::time::sleep(hint).await;
                }
            }
        }
    }

    /// Whether a call to `tool` would currently be admitted, without
    /// consuming a slot
    pub async fn check_limits(&self, tool: &str) -> LimitStatus {
        if let Some(global) = &self.global {
            let used = self.store.count("global", global.period).await;
            if used >= global.limit {
                return LimitStatus {
                    blocked_scope: Some("global".to_string()),
                    retry_after: Some(global.period),
                };
            }
        }
        if let Some(config) = self.per_tool.get(tool) {
            let key = Self::tool_key(tool);
            let used = self.store.count(&key, config.period).await;
            if used >= config.limit {
                return LimitStatus {
                    blocked_scope: Some(key),
                    retry_after: Some(config.period),
                };
            }
        }
        LimitStatus {
            blocked_scope: None,
            retry_after: None,
        }
    }

    /// Usage snapshot for every configured scope
    pub async fn usage(&self) -> Vec<ScopeUsage> {
        let mut out = Vec::new();
        if let Some(global) = &self.global {
            let used = self.store.count("global", global.period).await;
            out.push(ScopeUsage {
                scope: "global".to_string(),
                used,
                limit: global.limit,
                remaining: global.limit.saturating_sub(used),
                period: global.period,
            });
        }
        for (tool, config) in &self.per_tool {
            let key = Self::tool_key(tool);
            let used = self.store.count(&key, config.period).await;
            out.push(ScopeUsage {
                scope: key,
                used,
                limit: config.limit,
                remaining: config.limit.saturating_sub(used),
                period: config.period,
            });
        }
        out
    }

    /// Clear one scope's window, or every window when `scope` is `None`
    pub async fn reset(&self, scope: Option<&str>) {
        match scope {
            Some(key) => self.store.reset(key).await,
            None => self.store.reset_all().await,
        }
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("global", &self.global)
            .field("per_tool", &self.per_tool)
            .finish_non_exhaustive()
    }
}

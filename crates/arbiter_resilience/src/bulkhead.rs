//! Concurrency isolation per tool.
//!
//! Each tool draws permits from its own semaphore so a stampede on one tool
//! cannot starve the rest. An optional global semaphore caps total in-flight
//! calls. Limits resolve exact name first, then the longest matching glob
//! pattern, then the default.

use arbiter_core::{CoreResult, ToolError};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency limits for the bulkhead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Limit for tools without an exact or pattern match
    pub default_limit: usize,
    /// Exact per-tool limits
    pub tool_limits: IndexMap<String, usize>,
    /// Glob patterns (`*` and `?`) with their limits
    pub patterns: Vec<(String, usize)>,
    /// Cap on total in-flight calls across all tools
    pub global_limit: Option<usize>,
    /// How long to wait for a permit before rejecting
    pub acquisition_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            tool_limits: IndexMap::new(),
            patterns: Vec::new(),
            global_limit: None,
            acquisition_timeout: Duration::from_secs(5),
        }
    }
}

impl BulkheadConfig {
    /// Set the default per-tool limit
    #[must_use]
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Set an exact per-tool limit
    #[must_use]
    pub fn with_tool_limit(mut self, tool: impl Into<String>, limit: usize) -> Self {
        self.tool_limits.insert(tool.into(), limit.max(1));
        self
    }

    /// Add a glob pattern limit (e.g. `"db_*"`)
    #[must_use]
    pub fn with_pattern_limit(mut self, pattern: impl Into<String>, limit: usize) -> Self {
        self.patterns.push((pattern.into(), limit.max(1)));
        self
    }

    /// Cap total in-flight calls
    #[must_use]
    pub fn with_global_limit(mut self, limit: usize) -> Self {
        self.global_limit = Some(limit.max(1));
        self
    }

    /// Set the permit acquisition timeout
    #[must_use]
    pub const fn with_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = timeout;
        self
    }
}

/// RAII permit; concurrency slots release on drop
#[derive(Debug)]
pub struct BulkheadPermit {
    _tool: OwnedSemaphorePermit,
    _global: Option<OwnedSemaphorePermit>,
}

struct CompiledPattern {
    regex: Regex,
    // longer source patterns win ties
    source_len: usize,
    limit: usize,
}

/// Per-tool concurrency limiter
pub struct Bulkhead {
    config: BulkheadConfig,
    patterns: Vec<CompiledPattern>,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    global: Option<Arc<Semaphore>>,
}

impl Bulkhead {
    /// Create a bulkhead, compiling the configured glob patterns
    #[must_use]
    pub fn new(config: BulkheadConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|(pattern, limit)| CompiledPattern {
                regex: glob_to_regex(pattern),
                source_len: pattern.len(),
                limit: *limit,
            })
            .collect();
        let global = config
            .global_limit
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Self {
            config,
            patterns,
            semaphores: Mutex::new(HashMap::new()),
            global,
        }
    }

    /// Effective concurrency limit for `tool`
    #[must_use]
    pub fn limit_for(&self, tool: &str) -> usize {
        if let Some(limit) = self.config.tool_limits.get(tool) {
            return *limit;
        }
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(tool))
            .max_by_key(|p| p.source_len)
            .map_or(self.config.default_limit, |p| p.limit)
    }

    fn semaphore_for(&self, tool: &str) -> Arc<Semaphore> {
        let mut semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        semaphores
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limit_for(tool))))
            .clone()
    }

    /// Acquire a permit for `tool`, waiting up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::RateLimited`] with scope `bulkhead:{tool}` when
    /// the timeout elapses before a permit frees.
    pub async fn acquire(&self, tool: &str) -> CoreResult<BulkheadPermit> {
        let timeout = self.config.acquisition_timeout;

        let global = match &self.global {
            Some(semaphore) => {
                let limit = self.config.global_limit.unwrap_or_default();
                let permit = tokio::time::timeout(timeout, semaphore.clone().acquire_owned())
                    .await
                    .map_err(|_| self.saturated("bulkhead:global", limit))?
                    .map_err(|_| ToolError::Cancelled)?;
                Some(permit)
            }
            None => None,
        };

        let semaphore = self.semaphore_for(tool);
        let permit = tokio::time::timeout(timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| self.saturated(&format!("bulkhead:{tool}"), self.limit_for(tool)))?
            .map_err(|_| ToolError::Cancelled)?;

        Ok(BulkheadPermit {
            _tool: permit,
            _global: global,
        })
    }

    /// Permits currently available for `tool`
    #[must_use]
    pub fn available(&self, tool: &str) -> usize {
        self.semaphore_for(tool).available_permits()
    }

    fn saturated(&self, scope: &str, limit: usize) -> ToolError {
        ToolError::RateLimited {
            scope: scope.to_string(),
            limit: limit as u64,
            retry_after_ms: Some(self.config.acquisition_timeout.as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything except `*` and `?` matches literally, so the escaped pattern
/// always compiles.
fn glob_to_regex(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    match Regex::new(&format!("^{escaped}$")) {
        Ok(regex) => regex,
        Err(err) => unreachable!("escaped glob failed to compile: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_resolution_order() {
        let bulkhead = Bulkhead::new(
            BulkheadConfig::default()
                .with_default_limit(10)
                .with_tool_limit("db_query", 2)
                .with_pattern_limit("db_*", 4)
                .with_pattern_limit("db_write_*", 1),
        );

        // exact beats pattern
        assert_eq!(bulkhead.limit_for("db_query"), 2);
        // longest matching pattern wins
        assert_eq!(bulkhead.limit_for("db_write_users"), 1);
        assert_eq!(bulkhead.limit_for("db_read_users"), 4);
        // no match falls back to default
        assert_eq!(bulkhead.limit_for("http_fetch"), 10);
    }

    #[test]
    fn test_question_mark_glob() {
        let bulkhead = Bulkhead::new(BulkheadConfig::default().with_pattern_limit("shard?", 3));
        assert_eq!(bulkhead.limit_for("shard1"), 3);
        assert_eq!(bulkhead.limit_for("shard12"), 10);
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let bulkhead = Bulkhead::new(
            BulkheadConfig::default()
                .with_tool_limit("fetch", 2)
                .with_acquisition_timeout(Duration::from_millis(30)),
        );

        let p1 = bulkhead.acquire("fetch").await.unwrap();
        let _p2 = bulkhead.acquire("fetch").await.unwrap();
        assert_eq!(bulkhead.available("fetch"), 0);

        let err = bulkhead.acquire("fetch").await.unwrap_err();
        match err {
            ToolError::RateLimited { scope, limit, .. } => {
                assert_eq!(scope, "bulkhead:fetch");
                assert_eq!(limit, 2);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        drop(p1);
        assert!(bulkhead.acquire("fetch").await.is_ok());
    }

    #[tokio::test]
    async fn test_tools_are_isolated() {
        let bulkhead = Bulkhead::new(
            BulkheadConfig::default()
                .with_tool_limit("fetch", 1)
                .with_acquisition_timeout(Duration::from_millis(30)),
        );

        let _held = bulkhead.acquire("fetch").await.unwrap();
        assert!(bulkhead.acquire("fetch").await.is_err());
        // other tools unaffected
        assert!(bulkhead.acquire("store").await.is_ok());
    }

    #[tokio::test]
    async fn test_global_limit_spans_tools() {
        let bulkhead = Bulkhead::new(
            BulkheadConfig::default()
                .with_global_limit(2)
                .with_acquisition_timeout(Duration::from_millis(30)),
        );

        let _p1 = bulkhead.acquire("a").await.unwrap();
        let _p2 = bulkhead.acquire("b").await.unwrap();
        let err = bulkhead.acquire("c").await.unwrap_err();
        match err {
            ToolError::RateLimited { scope, .. } => assert_eq!(scope, "bulkhead:global"),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_waiter_admitted_when_permit_frees() {
        let bulkhead = Arc::new(Bulkhead::new(
            BulkheadConfig::default()
                .with_tool_limit("fetch", 1)
                .with_acquisition_timeout(Duration::from_millis(500)),
        ));

        let permit = bulkhead.acquire("fetch").await.unwrap();
        let contender = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire("fetch").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(permit);
        assert!(contender.await.unwrap().is_ok());
    }

    #[test]
    fn test_metacharacters_match_literally() {
        // only `*` and `?` are glob syntax; everything else is literal
        let bulkhead = Bulkhead::new(BulkheadConfig::default().with_pattern_limit("a[b*", 3));
        assert_eq!(bulkhead.limit_for("a[bcd"), 3);
        // `[b` is not a character class
        assert_eq!(bulkhead.limit_for("abcd"), 10);

        let dotted = Bulkhead::new(BulkheadConfig::default().with_pattern_limit("ns.fetch", 2));
        assert_eq!(dotted.limit_for("ns.fetch"), 2);
        // `.` does not match any character
        assert_eq!(dotted.limit_for("nsXfetch"), 10);
    }
}

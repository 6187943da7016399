//! Reasoner configuration.

use crate::error::{ReasonerError, Result};
use serde::{Deserialize, Serialize};

/// Per-registry reasoner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Worker threads shared by all resolver actors of one registry.
    pub worker_threads: usize,
    /// Attach explanation trees to inferred answers. Explainability is
    /// tracked either way.
    pub explain: bool,
    /// Abort a pass after this many iterations instead of iterating to a
    /// fixpoint.
    pub iteration_limit: Option<u32>,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(2),
            explain: true,
            iteration_limit: None,
        }
    }
}

impl ReasonerConfig {
    /// Defaults overridden by `KESTREL_WORKER_THREADS`, `KESTREL_EXPLAIN`
    /// and `KESTREL_ITERATION_LIMIT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(threads) = std::env::var("KESTREL_WORKER_THREADS") {
            config.worker_threads = threads
                .trim()
                .parse()
                .map_err(|e| ReasonerError::Config(format!("KESTREL_WORKER_THREADS={threads}: {e}")))?;
        }
        if let Ok(explain) = std::env::var("KESTREL_EXPLAIN") {
            config.explain = match explain.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => return Err(ReasonerError::Config(format!("KESTREL_EXPLAIN={other}: expected a boolean"))),
            };
        }
        if let Ok(limit) = std::env::var("KESTREL_ITERATION_LIMIT") {
            config.iteration_limit = Some(
                limit
                    .trim()
                    .parse()
                    .map_err(|e| ReasonerError::Config(format!("KESTREL_ITERATION_LIMIT={limit}: {e}")))?,
            );
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ReasonerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(ReasonerError::Config("worker_threads must be at least 1".into()));
        }
        if self.iteration_limit == Some(0) {
            return Err(ReasonerError::Config("iteration_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_iteration_limit(mut self, limit: u32) -> Self {
        self.iteration_limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ReasonerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ReasonerConfig::from_json(r#"{ "worker_threads": 3 }"#).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert!(config.explain);
        assert_eq!(config.iteration_limit, None);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = ReasonerConfig::from_json(r#"{ "worker_threads": 0 }"#).unwrap_err();
        assert!(matches!(err, ReasonerError::Config(_)));
        assert!(ReasonerConfig::default().with_iteration_limit(0).validate().is_err());
    }
}

//! Configuration for agents and the model reliability layer.
//!
//! Configuration can be built in code (every type implements [`Default`]), loaded
//! from a JSON file, or read from `SMOLAGENTS_*` environment variables. A `.env`
//! file in the working directory is honored when loading from the environment.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SMOLAGENTS_MAX_STEPS` | `agent.max_steps` |
//! | `SMOLAGENTS_MAX_TOOL_THREADS` | `agent.max_tool_threads` |
//! | `SMOLAGENTS_MAX_TOTAL_TOKENS` | `agent.max_total_tokens` |
//! | `SMOLAGENTS_MAX_DURATION_SECS` | `agent.max_duration_secs` |
//! | `SMOLAGENTS_TEMPERATURE` | `agent.temperature` |
//! | `SMOLAGENTS_RETRY_MAX_ATTEMPTS` | `reliability.retry.max_attempts` |
//! | `SMOLAGENTS_RETRY_BASE_DELAY_MS` | `reliability.retry.base_delay_ms` |
//! | `SMOLAGENTS_RETRY_MAX_DELAY_MS` | `reliability.retry.max_delay_ms` |
//! | `SMOLAGENTS_CIRCUIT_THRESHOLD` | `reliability.circuit_breaker.threshold` |
//! | `SMOLAGENTS_CIRCUIT_COOL_OFF_MS` | `reliability.circuit_breaker.cool_off_ms` |
//! | `SMOLAGENTS_RATE_LIMIT_CAPACITY` | `reliability.rate_limit.capacity` |
//! | `SMOLAGENTS_RATE_LIMIT_REFILL_PER_SECOND` | `reliability.rate_limit.refill_per_second` |

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Settings for the ReAct loop itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Upper bound on tool calls executed concurrently within one step
    pub max_tool_threads: usize,
    pub max_total_tokens: Option<u64>,
    pub max_duration_secs: Option<u64>,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_tool_threads: 4,
            max_total_tokens: None,
            max_duration_secs: None,
            temperature: 0.5,
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(AgentError::ConfigError("max_steps must be at least 1".into()));
        }
        if self.max_tool_threads == 0 {
            return Err(AgentError::ConfigError("max_tool_threads must be at least 1".into()));
        }
        Ok(())
    }
}

/// Bounded exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per model, the first call included
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the computed delay applied as random jitter (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AgentError::ConfigError("retry.max_attempts must be at least 1".into()));
        }
        if self.multiplier < 1.0 {
            return Err(AgentError::ConfigError("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(AgentError::ConfigError("retry.jitter must be within 0.0..=1.0".into()));
        }
        Ok(())
    }
}

/// Circuit breaker settings, shared by every breaker in a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub threshold: usize,
    /// How long an open circuit refuses calls before admitting a trial
    pub cool_off_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cool_off_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cool_off(&self) -> Duration {
        Duration::from_millis(self.cool_off_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(AgentError::ConfigError(
                "circuit_breaker.threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Token-bucket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(AgentError::ConfigError("rate_limit.capacity must be at least 1".into()));
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err(AgentError::ConfigError(
                "rate_limit.refill_per_second must be a finite number > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: Option<RateLimitConfig>,
}

impl ReliabilityConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub reliability: ReliabilityConfig,
}

impl Config {
    /// Load from `SMOLAGENTS_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, using the environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let agent = &mut config.agent;
        let reliability = &mut config.reliability;

        set(&lookup, "SMOLAGENTS_MAX_STEPS", &mut agent.max_steps)?;
        set(&lookup, "SMOLAGENTS_MAX_TOOL_THREADS", &mut agent.max_tool_threads)?;
        set_opt(&lookup, "SMOLAGENTS_MAX_TOTAL_TOKENS", &mut agent.max_total_tokens)?;
        set_opt(&lookup, "SMOLAGENTS_MAX_DURATION_SECS", &mut agent.max_duration_secs)?;
        set(&lookup, "SMOLAGENTS_TEMPERATURE", &mut agent.temperature)?;

        set(&lookup, "SMOLAGENTS_RETRY_MAX_ATTEMPTS", &mut reliability.retry.max_attempts)?;
        set(&lookup, "SMOLAGENTS_RETRY_BASE_DELAY_MS", &mut reliability.retry.base_delay_ms)?;
        set(&lookup, "SMOLAGENTS_RETRY_MAX_DELAY_MS", &mut reliability.retry.max_delay_ms)?;
        set(&lookup, "SMOLAGENTS_CIRCUIT_THRESHOLD", &mut reliability.circuit_breaker.threshold)?;
        set(&lookup, "SMOLAGENTS_CIRCUIT_COOL_OFF_MS", &mut reliability.circuit_breaker.cool_off_ms)?;

        let mut capacity: Option<u32> = None;
        let mut refill: Option<f64> = None;
        set_opt(&lookup, "SMOLAGENTS_RATE_LIMIT_CAPACITY", &mut capacity)?;
        set_opt(&lookup, "SMOLAGENTS_RATE_LIMIT_REFILL_PER_SECOND", &mut refill)?;
        reliability.rate_limit = match (capacity, refill) {
            (None, None) => None,
            (Some(capacity), Some(refill_per_second)) => Some(RateLimitConfig {
                capacity,
                refill_per_second,
            }),
            _ => {
                return Err(AgentError::ConfigError(
                    "SMOLAGENTS_RATE_LIMIT_CAPACITY and SMOLAGENTS_RATE_LIMIT_REFILL_PER_SECOND \
                     must be set together"
                        .into(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.reliability.validate()
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AgentError::ConfigError(format!("{} has an invalid value: {:?}", key, raw)))
}

fn set<T: FromStr, F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    target: &mut T,
) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *target = parse(key, &raw)?;
    }
    Ok(())
}

fn set_opt<T: FromStr, F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    target: &mut Option<T>,
) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *target = Some(parse(key, &raw)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.agent.max_steps, 20);
        assert_eq!(config.agent.max_tool_threads, 4);
        assert_eq!(config.reliability.retry.max_attempts, 3);
        assert_eq!(config.reliability.circuit_breaker.threshold, 5);
        assert_eq!(config.reliability.circuit_breaker.cool_off(), Duration::from_secs(30));
        assert!(config.reliability.rate_limit.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SMOLAGENTS_MAX_STEPS", "7"),
            ("SMOLAGENTS_MAX_TOTAL_TOKENS", "10000"),
            ("SMOLAGENTS_MAX_DURATION_SECS", "60"),
            ("SMOLAGENTS_RETRY_MAX_ATTEMPTS", "5"),
            ("SMOLAGENTS_CIRCUIT_COOL_OFF_MS", "250"),
            ("SMOLAGENTS_RATE_LIMIT_CAPACITY", "10"),
            ("SMOLAGENTS_RATE_LIMIT_REFILL_PER_SECOND", "2.5"),
        ]))
        .unwrap();

        assert_eq!(config.agent.max_steps, 7);
        assert_eq!(config.agent.max_total_tokens, Some(10_000));
        assert_eq!(config.agent.max_duration(), Some(Duration::from_secs(60)));
        assert_eq!(config.reliability.retry.max_attempts, 5);
        assert_eq!(config.reliability.circuit_breaker.cool_off_ms, 250);
        assert_eq!(
            config.reliability.rate_limit,
            Some(RateLimitConfig {
                capacity: 10,
                refill_per_second: 2.5
            })
        );
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = Config::from_lookup(lookup(&[("SMOLAGENTS_MAX_STEPS", "lots")]));
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_from_lookup_rejects_zero_steps() {
        let result = Config::from_lookup(lookup(&[("SMOLAGENTS_MAX_STEPS", "0")]));
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_rate_limit_requires_both_values() {
        let result = Config::from_lookup(lookup(&[("SMOLAGENTS_RATE_LIMIT_CAPACITY", "10")]));
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_validation_rules() {
        let mut retry = RetryConfig::default();
        retry.jitter = 1.5;
        assert!(retry.validate().is_err());

        let rate = RateLimitConfig {
            capacity: 1,
            refill_per_second: 0.0,
        };
        assert!(rate.validate().is_err());

        let breaker = CircuitBreakerConfig {
            threshold: 0,
            cool_off_ms: 10,
        };
        assert!(breaker.validate().is_err());
    }

    #[test]
    fn test_from_file_with_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"agent": {{"max_steps": 3}}, "reliability": {{"retry": {{"max_attempts": 2}}}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.agent.max_steps, 3);
        assert_eq!(config.agent.max_tool_threads, 4);
        assert_eq!(config.reliability.retry.max_attempts, 2);
        assert_eq!(config.reliability.retry.base_delay_ms, 500);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/definitely/not/here.json");
        assert!(matches!(result, Err(AgentError::IoError(_))));
    }
}

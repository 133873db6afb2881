//! Reliable model access: retry, circuit breaking, rate limiting and fallback.
//!
//! [`ModelReliability`] wraps a primary model and an ordered list of fallbacks.
//! Each generation tries the models in order. A model is called through its
//! service's circuit breaker and the shared rate limiter, retried according to
//! the [`RetryPolicy`], and once it has failed it is skipped for the rest of the
//! [`ReliabilitySession`] (one agent run).

use crate::config::ReliabilityConfig;
use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, EventBus};
use crate::llm::{ChatMessage, GenerationConfig, Model, ModelResponse};
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, RateLimiter, RetryPolicy};
use crate::tools::ToolDescriptor;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// A successful generation and where it came from
#[derive(Debug, Clone)]
pub struct Generation {
    pub response: ModelResponse,
    pub model_id: String,
    /// Calls made to the answering model, the successful one included
    pub attempts: usize,
}

/// Failover state for one agent run.
///
/// A model that failed within the session is not tried again in it.
#[derive(Debug, Default)]
pub struct ReliabilitySession {
    exhausted: HashSet<usize>,
    failures: Vec<(String, String)>,
}

impl ReliabilitySession {
    /// `(model_id, error)` for every model that failed so far
    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    pub fn exhausted_count(&self) -> usize {
        self.exhausted.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelHealth {
    pub model_id: String,
    pub service: String,
    pub circuit: CircuitState,
    pub reachable: Option<bool>,
}

pub struct ModelReliability {
    models: Vec<Arc<dyn Model>>,
    retry: RetryPolicy,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ModelReliability {
    pub fn new(primary: Arc<dyn Model>) -> Self {
        Self {
            models: vec![primary],
            retry: RetryPolicy::default(),
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            limiter: None,
        }
    }

    pub fn from_config(
        primary: Arc<dyn Model>,
        fallbacks: Vec<Arc<dyn Model>>,
        config: &ReliabilityConfig,
    ) -> Result<Self> {
        config.validate()?;

        let limiter = config
            .rate_limit
            .as_ref()
            .map(RateLimiter::from_config)
            .transpose()?
            .map(Arc::new);

        let mut reliability = Self::new(primary)
            .with_retry_policy(RetryPolicy::from_config(&config.retry))
            .with_breakers(Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())));
        reliability.limiter = limiter;
        for fallback in fallbacks {
            reliability = reliability.with_fallback(fallback);
        }
        Ok(reliability)
    }

    /// Append a model to try after the ones already configured
    pub fn with_fallback(mut self, model: Arc<dyn Model>) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share breakers with other components talking to the same services
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.model_id()).collect()
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn start_session(&self) -> ReliabilitySession {
        ReliabilitySession::default()
    }

    /// Generate a response from the first model in the chain that can provide one.
    ///
    /// Returns [`AgentError::FallbackExhausted`] when every model has failed
    /// within `session`.
    pub async fn generate(
        &self,
        session: &mut ReliabilitySession,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
        events: &EventBus,
    ) -> Result<Generation> {
        let total = self.models.len();

        for (index, model) in self.models.iter().enumerate() {
            if session.exhausted.contains(&index) {
                continue;
            }

            info!(model = %model.model_id(), position = index + 1, total, "Trying model");
            let breaker = self.breakers.get(model.service_name());
            let mut attempts = 0;

            let result = self
                .retry
                .execute_observed(
                    |attempt| {
                        attempts = attempt;
                        self.call_once(model.as_ref(), &breaker, messages, tools, config, events)
                    },
                    |attempt, error, delay| {
                        events.emit(AgentEvent::ModelRetry {
                            model_id: model.model_id().to_string(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            error: error.to_string(),
                        })
                    },
                )
                .await;

            match result {
                Ok(response) => {
                    return Ok(Generation {
                        response,
                        model_id: model.model_id().to_string(),
                        attempts,
                    })
                }
                Err(error) => {
                    session.exhausted.insert(index);
                    session.failures.push((model.model_id().to_string(), error.to_string()));

                    let next = self
                        .models
                        .iter()
                        .enumerate()
                        .skip(index + 1)
                        .find(|(i, _)| !session.exhausted.contains(i))
                        .map(|(_, m)| m.model_id().to_string());

                    warn!(
                        model = %model.model_id(),
                        next = next.as_deref().unwrap_or("none"),
                        error = %error,
                        "Model failed"
                    );
                    events.emit(AgentEvent::ModelFallback {
                        from_model: model.model_id().to_string(),
                        to_model: next,
                        error: error.to_string(),
                    });
                }
            }
        }

        Err(AgentError::FallbackExhausted {
            failures: session.failures.clone(),
        })
    }

    async fn call_once(
        &self,
        model: &dyn Model,
        breaker: &CircuitBreaker,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
        events: &EventBus,
    ) -> Result<ModelResponse> {
        let permit = breaker.try_acquire()?;

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        match model.generate(messages, tools, config).await {
            Ok(response) => {
                permit.success();
                Ok(response)
            }
            Err(error) => {
                if permit.failure() {
                    events.emit(AgentEvent::CircuitOpened {
                        service: breaker.service().to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    /// Circuit state of every model, optionally probing each with a health check
    pub async fn health_report(&self, probe: bool) -> Vec<ModelHealth> {
        let mut report = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let reachable = if probe {
                Some(model.health_check().await.unwrap_or(false))
            } else {
                None
            };
            report.push(ModelHealth {
                model_id: model.model_id().to_string(),
                service: model.service_name().to_string(),
                circuit: self.breakers.get(model.service_name()).state(),
                reachable,
            });
        }
        report
    }
}

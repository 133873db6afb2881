//! Serialized access to a model through a FIFO request queue.
//!
//! A [`RequestQueue`] owns a background worker that handles one request at a
//! time, in submission order, optionally gated by a [`RateLimiter`]. The queue
//! itself implements [`Model`], so it can stand in for the model it wraps.

use crate::error::{AgentError, Result};
use crate::llm::{ChatMessage, GenerationConfig, Model, ModelResponse};
use crate::resilience::RateLimiter;
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Job {
    messages: Vec<ChatMessage>,
    tools: Vec<ToolDescriptor>,
    config: GenerationConfig,
    reply: oneshot::Sender<Result<ModelResponse>>,
    pending: PendingGuard,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    pending: AtomicUsize,
}

/// Counts a request as pending for as long as it lives.
///
/// Travels with the job, so a request abandoned before it was enqueued, or
/// rejected by a closed queue, stops counting as soon as it is dropped.
struct PendingGuard(Arc<Counters>);

impl PendingGuard {
    fn new(counters: &Arc<Counters>) -> Self {
        counters.pending.fetch_add(1, Ordering::SeqCst);
        Self(counters.clone())
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub processed: u64,
    pub failed: u64,
    pub pending: usize,
}

pub struct RequestQueue {
    model_id: String,
    service: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl RequestQueue {
    /// Start a queue in front of `model` holding at most `capacity` waiting requests.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(model: Arc<dyn Model>, capacity: usize) -> Self {
        Self::with_rate_limiter(model, capacity, None)
    }

    pub fn with_rate_limiter(
        model: Arc<dyn Model>,
        capacity: usize,
        limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let model_id = model.model_id().to_string();
        let service = model.service_name().to_string();

        let handle = tokio::spawn(Self::worker_loop(model, receiver, limiter, counters.clone()));
        info!(model = %model_id, capacity, "Request queue started");

        Self {
            model_id,
            service,
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(handle)),
            counters,
        }
    }

    async fn worker_loop(
        model: Arc<dyn Model>,
        mut receiver: mpsc::Receiver<Job>,
        limiter: Option<Arc<RateLimiter>>,
        counters: Arc<Counters>,
    ) {
        while let Some(job) = receiver.recv().await {
            if let Some(limiter) = &limiter {
                limiter.acquire().await;
            }

            let result = model.generate(&job.messages, &job.tools, &job.config).await;
            drop(job.pending);
            match &result {
                Ok(_) => counters.processed.fetch_add(1, Ordering::SeqCst),
                Err(e) => {
                    warn!(model = %model.model_id(), error = %e, "Queued request failed");
                    counters.failed.fetch_add(1, Ordering::SeqCst)
                }
            };

            if job.reply.send(result).is_err() {
                debug!("Requester went away before the reply was ready");
            }
        }
        info!(model = %model.model_id(), "Request queue worker stopped");
    }

    /// Enqueue a request and wait for its response
    pub async fn submit(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDescriptor>,
        config: GenerationConfig,
    ) -> Result<ModelResponse> {
        let sender = {
            let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone().ok_or(AgentError::QueueClosed)?
        };

        let (reply, response) = oneshot::channel();
        let job = Job {
            messages,
            tools,
            config,
            reply,
            pending: PendingGuard::new(&self.counters),
        };
        if sender.send(job).await.is_err() {
            return Err(AgentError::QueueClosed);
        }

        response.await.map_err(|_| AgentError::QueueClosed)?
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting requests, let queued ones finish, then stop the worker.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Request queue worker ended abnormally");
            }
        }
    }
}

#[async_trait]
impl Model for RequestQueue {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn service_name(&self) -> &str {
        &self.service
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        self.submit(messages.to_vec(), tools.to_vec(), config.clone()).await
    }
}

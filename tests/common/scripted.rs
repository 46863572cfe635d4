//! Scripted LLM provider for integration tests: canned responses, an
//! optional per-call delay, and a call log so tests can assert how many
//! provider calls a flow made and whether any of them overlapped.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docuchat::error::Result;
use docuchat::models::message::BranchMessage;
use docuchat::services::llm::{
    ContextDoc, GenerateOutput, LlmProvider, extract_source_chunks, extract_sources,
};

pub struct ScriptedProvider {
    response: String,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    generate_queries: Mutex<Vec<String>>,
    simple_prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            generate_queries: Mutex::new(Vec::new()),
            simple_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Makes every call hold its "generation" for `delay`, so lock
    /// contention between concurrent turns is observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of provider calls that were ever in flight at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn generate_queries(&self) -> Vec<String> {
        self.generate_queries.lock().expect("call log poisoned").clone()
    }

    pub fn simple_prompts(&self) -> Vec<String> {
        self.simple_prompts.lock().expect("call log poisoned").clone()
    }

    async fn run_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(
        &self,
        query: &str,
        context_docs: &[ContextDoc],
        _recent: &[BranchMessage],
        _aux_context: &str,
    ) -> Result<GenerateOutput> {
        self.generate_queries
            .lock()
            .expect("call log poisoned")
            .push(query.to_string());
        self.run_call().await;

        Ok(GenerateOutput {
            response: self.response.clone(),
            sources: extract_sources(context_docs),
            source_chunks: extract_source_chunks(context_docs),
        })
    }

    async fn generate_simple(&self, prompt: &str) -> Result<String> {
        self.simple_prompts
            .lock()
            .expect("call log poisoned")
            .push(prompt.to_string());
        self.run_call().await;
        Ok(self.response.clone())
    }
}

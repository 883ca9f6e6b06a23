//! LLM boundary: `LlmClient` trait plus the lenient JSON parsing the
//! template generator and refiner share (§9 "LLM interactions").
//!
//! Out of scope per §1: no production LLM HTTP client is implemented here.
//! This module defines the trait boundary and the token/cost accounting the
//! reference implementation's `gpt.py` wrapper performs around every call.

use crate::error::{Result, SynthError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// One LLM completion response. `cost_usd` is an estimate derived from
/// token counts and the caller's price table; the trait itself carries no
/// pricing policy.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Boundary trait for the (out-of-scope) LLM HTTP client (§4.C5 Rust
/// addition). Implementations own retry-on-rate-limit using the server's
/// `Retry-After` header (§5 "Cancellation & timeouts"); that policy is not
/// modeled here since it is the client's concern, not the caller's.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmReply>;
    /// Model identifier surfaced in `summary.json`.
    fn model_name(&self) -> &str;
}

/// Running token/cost totals across every LLM call, mutex-protected per §5
/// ("The LLM client additionally maintains token/cost running totals
/// protected by a mutex").
#[derive(Debug, Default)]
struct TotalsInner {
    prompt_tokens: u64,
    completion_tokens: u64,
    cost_usd: f64,
    calls: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LlmTotals(Arc<Mutex<TotalsInner>>);

impl LlmTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reply: &LlmReply) {
        let mut inner = self.0.lock();
        inner.prompt_tokens += reply.prompt_tokens;
        inner.completion_tokens += reply.completion_tokens;
        inner.cost_usd += reply.cost_usd;
        inner.calls += 1;
    }

    pub fn snapshot(&self) -> LlmTotalsSnapshot {
        let inner = self.0.lock();
        LlmTotalsSnapshot {
            prompt_tokens: inner.prompt_tokens,
            completion_tokens: inner.completion_tokens,
            cost_usd: inner.cost_usd,
            calls: inner.calls,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct LlmTotalsSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub calls: u64,
}

/// Wraps an `LlmClient`, aggregating totals across calls transparently.
pub struct MeteredLlmClient<C: LlmClient> {
    inner: C,
    totals: LlmTotals,
}

impl<C: LlmClient> MeteredLlmClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner, totals: LlmTotals::new() }
    }

    pub fn totals(&self) -> LlmTotals {
        self.totals.clone()
    }
}

#[async_trait::async_trait]
impl<C: LlmClient> LlmClient for MeteredLlmClient<C> {
    async fn complete(&self, prompt: &str) -> Result<LlmReply> {
        let reply = self.inner.complete(prompt).await?;
        self.totals.record(&reply);
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Parse `text` as JSON, tolerating a single JSON object embedded in prose:
/// strict parse first, then fall back to extracting the first balanced
/// `{...}` substring (§9 "LLM interactions", grounded in the reference
/// implementation's prompt responses, which are always prose-wrapped JSON).
pub fn parse_json_lenient(text: &str) -> Result<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }
    if let Some(slice) = extract_balanced_braces(text) {
        if let Ok(v) = serde_json::from_str::<Value>(slice) {
            return Ok(v);
        }
    }
    Err(SynthError::Llm(format!("could not parse JSON from LLM reply: {text}")))
}

/// Find the first top-level balanced `{...}` substring, respecting quoted
/// strings so braces inside SQL literals don't prematurely close it.
fn extract_balanced_braces(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

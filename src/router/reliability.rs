//! Reliability policy engine: retry with backoff, provider fallback, and
//! the telemetry that goes with them.
//!
//! Policies are data, not code paths — the named presets are plain values
//! and [`ReliableRouter`] is parameterised on them, so the whole config
//! surface is exhaustively testable. The router client underneath performs
//! exactly one attempt per call; everything here composes those attempts.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, atomic::AtomicBool, atomic::Ordering as AtomicOrdering},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, ExecError, ExecResult};

use super::client::Router;
use super::types::{RouterRequest, RouterResponse};

/// Shared cancellation flag; setting it aborts in-flight work at the next
/// attempt or iteration boundary.
pub type CancelFlag = Arc<AtomicBool>;

// ─── Delay strings ───────────────────────────────────────────────────────────

/// Parse a delay string: `"500ms"`, `"1s"`, `"30s"`. Bare integers are
/// milliseconds.
pub fn parse_delay(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    s.parse::<u64>().ok().map(Duration::from_millis)
}

fn format_delay(d: &Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

/// Serde adapter storing `Duration` fields as delay strings in config.
mod duration_str {
    use super::{format_delay, parse_delay};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_delay(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_delay(&raw).ok_or_else(|| D::Error::custom(format!("unparseable delay: {raw:?}")))
    }
}

// ─── Backoff ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Exponential,
    Linear,
}

// ─── RetryConfig ─────────────────────────────────────────────────────────────

/// Retry policy for the primary provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (1–5).
    pub max_attempts: u32,
    pub backoff: Backoff,
    #[serde(with = "duration_str")]
    pub base_delay: Duration,
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
    /// Error classes eligible for retry.
    pub retryable: Vec<ErrorClass>,
}

const DEFAULT_RETRYABLE: [ErrorClass; 4] = [
    ErrorClass::Timeout,
    ErrorClass::Connection,
    ErrorClass::RateLimit,
    ErrorClass::ProviderUnavailable,
];

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retryable: DEFAULT_RETRYABLE.to_vec(),
        }
    }
}

impl RetryConfig {
    pub fn high_reliability() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn cost_optimized() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::Linear,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            ..Self::default()
        }
    }

    pub fn performance() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::Linear,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Look up a named preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "high_reliability" => Some(Self::high_reliability()),
            "cost_optimized" => Some(Self::cost_optimized()),
            "performance" => Some(Self::performance()),
            "default" => Some(Self::default()),
            _ => None,
        }
    }

    /// Delay applied before attempt `n` (1-based). Attempt 1 never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let raw = match self.backoff {
            Backoff::Exponential => self.base_delay * 2u32.saturating_pow(attempt - 2),
            Backoff::Linear => self.base_delay * (attempt - 1),
        };
        raw.min(self.max_delay)
    }

    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        self.retryable.contains(&class)
    }

    pub fn validate(&self) -> ExecResult<()> {
        if !(1..=5).contains(&self.max_attempts) {
            return Err(ExecError::Validation(format!(
                "retry.max_attempts must be in [1, 5], got {}",
                self.max_attempts
            )));
        }
        Ok(())
    }
}

// ─── FallbackConfig ──────────────────────────────────────────────────────────

/// Provider fallback policy, engaged once primary retries are exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Providers to try, in order.
    pub preferred_chain: Vec<String>,
    /// Maximum acceptable cost increase over the original estimate (0–2).
    pub max_cost_increase: f64,
    /// Require fallback providers to advertise every feature the agent needs.
    pub require_same_features: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            preferred_chain: Vec::new(),
            max_cost_increase: 0.5,
            require_same_features: true,
        }
    }
}

impl FallbackConfig {
    /// Guard values matching the named retry presets.
    pub fn for_preset(name: &str) -> Option<Self> {
        let (max_cost_increase, require_same_features) = match name {
            "high_reliability" => (1.0, true),
            "cost_optimized" => (0.2, true),
            "performance" => (0.3, false),
            "default" => (0.5, true),
            _ => return None,
        };
        Some(Self {
            max_cost_increase,
            require_same_features,
            ..Self::default()
        })
    }

    pub fn validate(&self, catalog: &ProviderCatalog) -> ExecResult<()> {
        if !(0.0..=2.0).contains(&self.max_cost_increase) {
            return Err(ExecError::Validation(format!(
                "fallback.max_cost_increase must be in [0, 2], got {}",
                self.max_cost_increase
            )));
        }
        for p in &self.preferred_chain {
            if !catalog.contains(p) {
                return Err(ExecError::Validation(format!(
                    "fallback provider '{p}' is not in the live provider list"
                )));
            }
        }
        Ok(())
    }
}

// ─── ProviderCatalog ─────────────────────────────────────────────────────────

/// A known provider: advertised features and a cost estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInfo {
    pub name: String,
    pub features: HashSet<String>,
    pub est_cost_per_request: f64,
}

/// The router's live provider list, used by fallback validation and the
/// feature/cost guards.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    providers: HashMap<String, ProviderInfo>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: ProviderInfo) {
        self.providers.insert(info.name.clone(), info);
    }

    pub fn from_config(entries: &[crate::config::ProviderEntry]) -> Self {
        let mut catalog = Self::new();
        for e in entries {
            catalog.insert(ProviderInfo {
                name: e.name.clone(),
                features: e.features.iter().cloned().collect(),
                est_cost_per_request: e.est_cost_per_request,
            });
        }
        catalog
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ProviderInfo> {
        self.providers.get(name)
    }

    /// Whether `name` advertises every feature in `required`.
    pub fn supports(&self, name: &str, required: &[String]) -> bool {
        match self.providers.get(name) {
            Some(info) => required.iter().all(|f| info.features.contains(f)),
            None => false,
        }
    }

    pub fn est_cost(&self, name: &str) -> Option<f64> {
        self.providers.get(name).map(|p| p.est_cost_per_request)
    }
}

// ─── ReliabilityTelemetry ────────────────────────────────────────────────────

/// Per-execution reliability telemetry, accumulated across every gateway
/// attempt (including attempts the gateway made internally).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityTelemetry {
    /// Extra attempts beyond the first.
    pub retry_attempts: u32,
    pub fallback_used: bool,
    /// Providers that failed, in the order they were abandoned.
    pub failed_providers: Vec<String>,
    /// Total time spent waiting between attempts.
    pub total_retry_time_ms: u64,
    /// Latency of the final successful attempt.
    pub provider_latency_ms: u64,
    pub routing_reason: String,
}

impl ReliabilityTelemetry {
    /// Record a failed provider, preserving first-failure order.
    pub fn record_failed_provider(&mut self, name: &str) {
        if !name.is_empty() && !self.failed_providers.iter().any(|p| p == name) {
            self.failed_providers.push(name.to_string());
        }
    }

    /// Fold in the gateway's own per-response telemetry.
    fn absorb_response(&mut self, response: &RouterResponse) {
        self.retry_attempts += response.attempt_count.saturating_sub(1);
        for p in &response.failed_providers {
            self.record_failed_provider(p);
        }
        self.provider_latency_ms = response.provider_latency_ms;
        if self.routing_reason.is_empty() {
            self.routing_reason = response.routing_reason.clone();
        }
    }

    /// Merge telemetry from a later gateway round (tool loop steps).
    pub fn merge(&mut self, other: &ReliabilityTelemetry) {
        self.retry_attempts += other.retry_attempts;
        self.fallback_used |= other.fallback_used;
        for p in &other.failed_providers {
            self.record_failed_provider(p);
        }
        self.total_retry_time_ms += other.total_retry_time_ms;
        self.provider_latency_ms = other.provider_latency_ms;
        if !other.routing_reason.is_empty() {
            self.routing_reason = other.routing_reason.clone();
        }
    }
}

/// A successful reliability-managed call plus its telemetry.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub response: RouterResponse,
    pub telemetry: ReliabilityTelemetry,
}

/// A failed reliability-managed call. The telemetry accumulated across the
/// retry loop and fallback chain survives the failure so a terminal Failed
/// record reports what actually happened.
#[derive(Debug)]
pub struct PolicyFailure {
    pub error: ExecError,
    pub telemetry: ReliabilityTelemetry,
}

impl PolicyFailure {
    pub fn new(error: ExecError, telemetry: ReliabilityTelemetry) -> Self {
        Self { error, telemetry }
    }
}

impl From<PolicyFailure> for ExecError {
    fn from(failure: PolicyFailure) -> Self {
        failure.error
    }
}

// ─── ReliableRouter ──────────────────────────────────────────────────────────

/// Retry + fallback wrapper around any [`Router`].
///
/// The primary provider is retried per [`RetryConfig`]; once attempts are
/// exhausted, each provider in the fallback chain gets exactly one attempt
/// (no nested retry), subject to the feature and cost guards.
pub struct ReliableRouter {
    inner: Arc<dyn Router>,
    catalog: ProviderCatalog,
}

impl ReliableRouter {
    pub fn new(inner: Arc<dyn Router>, catalog: ProviderCatalog) -> Self {
        Self { inner, catalog }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    fn check_cancelled(cancel: Option<&CancelFlag>) -> ExecResult<()> {
        if let Some(flag) = cancel
            && flag.load(AtomicOrdering::SeqCst)
        {
            return Err(ExecError::Cancelled);
        }
        Ok(())
    }

    /// Execute one logical LLM call under the given policy.
    ///
    /// `required_features` and `estimated_cost` feed the fallback guards;
    /// `estimated_cost` is the original per-request estimate for the primary
    /// provider. Failures carry the telemetry accumulated up to that point.
    #[tracing::instrument(skip_all, fields(model = %request.model, max_attempts = retry.max_attempts))]
    pub async fn call_with_policy(
        &self,
        request: &RouterRequest,
        retry: &RetryConfig,
        fallback: &FallbackConfig,
        required_features: &[String],
        estimated_cost: f64,
        cancel: Option<&CancelFlag>,
    ) -> Result<CallOutcome, PolicyFailure> {
        retry
            .validate()
            .map_err(|e| PolicyFailure::new(e, ReliabilityTelemetry::default()))?;
        fallback
            .validate(&self.catalog)
            .map_err(|e| PolicyFailure::new(e, ReliabilityTelemetry::default()))?;

        let mut telemetry = ReliabilityTelemetry::default();
        let mut last_err: Option<ExecError> = None;

        // ── Primary provider with retries ────────────────────────────────
        for attempt in 1..=retry.max_attempts {
            if let Err(e) = Self::check_cancelled(cancel) {
                return Err(PolicyFailure::new(e, telemetry));
            }

            if attempt > 1 {
                let mut delay = retry.delay_before(attempt);
                if let Some(hint) = last_err.as_ref().and_then(ExecError::retry_after) {
                    delay = delay.max(hint);
                }
                tokio::time::sleep(delay).await;
                telemetry.total_retry_time_ms += delay.as_millis() as u64;
                telemetry.retry_attempts += 1;
            }

            match self.inner.call(request).await {
                Ok(response) => {
                    telemetry.absorb_response(&response);
                    return Ok(CallOutcome {
                        response,
                        telemetry,
                    });
                }
                Err(e) if retry.is_retryable(e.class()) => {
                    tracing::warn!(attempt, class = %e.class(), "gateway attempt failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(PolicyFailure::new(e, telemetry)),
            }
        }

        if let Some(p) = &request.provider {
            telemetry.record_failed_provider(p);
        }

        // ── Fallback chain ───────────────────────────────────────────────
        if fallback.enabled {
            for provider in &fallback.preferred_chain {
                if telemetry.failed_providers.iter().any(|p| p == provider) {
                    continue;
                }
                if fallback.require_same_features
                    && !self.catalog.supports(provider, required_features)
                {
                    tracing::debug!(%provider, "fallback skipped: missing required features");
                    continue;
                }
                if let Some(cost) = self.catalog.est_cost(provider)
                    && cost > estimated_cost * (1.0 + fallback.max_cost_increase)
                {
                    tracing::debug!(%provider, cost, "fallback skipped: over cost ceiling");
                    continue;
                }

                if let Err(e) = Self::check_cancelled(cancel) {
                    return Err(PolicyFailure::new(e, telemetry));
                }

                let fallback_request = RouterRequest {
                    provider: Some(provider.clone()),
                    ..request.clone()
                };
                match self.inner.call(&fallback_request).await {
                    Ok(response) => {
                        telemetry.absorb_response(&response);
                        telemetry.fallback_used = true;
                        telemetry.routing_reason = format!("fallback:{provider}");
                        return Ok(CallOutcome {
                            response,
                            telemetry,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(%provider, class = %e.class(), "fallback provider failed");
                        telemetry.record_failed_provider(provider);
                        last_err = Some(e);
                    }
                }
            }
        }

        let error = last_err
            .unwrap_or_else(|| ExecError::Internal("no gateway attempt was made".to_string()));
        Err(PolicyFailure::new(error, telemetry))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

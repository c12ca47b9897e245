//! Backend caller: per-attempt invocation of a chosen provider with timeout,
//! exponential-backoff retries, and fallback providers. Follows the same
//! `tokio::time::timeout` race-the-whole-unit idiom used elsewhere in this crate, with a
//! retry loop adapted to exponential backoff plus a plugin-mutable fallback chain.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::Error;
use crate::hooks::HookDispatcher;
use crate::model::{DimensionResult, ProviderRequest, ProviderResponse, ProviderSelection, ResultMetadata};
use crate::provider::ProviderRegistry;

pub struct BackendCaller<'a> {
    pub registry: &'a ProviderRegistry,
    pub dispatcher: &'a HookDispatcher,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl<'a> BackendCaller<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        dispatcher: &'a HookDispatcher,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        BackendCaller {
            registry,
            dispatcher,
            max_retries,
            retry_delay,
        }
    }

    /// Runs the full retry + fallback sequence under a single timeout ceiling for the
    /// whole unit, not per attempt.
    pub async fn call_with_timeout(
        &self,
        dimension: &str,
        request: ProviderRequest,
        selection: &ProviderSelection,
        timeout: Duration,
    ) -> DimensionResult {
        match tokio::time::timeout(timeout, self.call(dimension, request, selection)).await {
            Ok(result) => result,
            Err(_) => DimensionResult::err_with_metadata(
                Error::DimensionTimeout {
                    dimension: dimension.to_string(),
                    ms: timeout.as_millis() as u64,
                }
                .to_string(),
                ResultMetadata {
                    duration_ms: Some(timeout.as_millis().max(1) as u64),
                    ..Default::default()
                },
            ),
        }
    }

    async fn call(
        &self,
        dimension: &str,
        request: ProviderRequest,
        selection: &ProviderSelection,
    ) -> DimensionResult {
        let start = Instant::now();
        let mut providers = vec![selection.provider.clone()];
        providers.extend(selection.fallbacks.iter().cloned());

        let mut tried = Vec::new();
        let mut current_request = request;
        current_request.dimension = Some(dimension.to_string());

        for (i, name) in providers.iter().enumerate() {
            tried.push(name.clone());

            if i > 0 {
                let previous = &providers[i - 1];
                let overrides = self
                    .dispatcher
                    .handle_provider_fallback(previous, name)
                    .await;
                if let Some(ms) = overrides.get("retryAfterMs").and_then(Value::as_u64) {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                if let Some(req) = overrides.get("request") {
                    if let Ok(mutated) = serde_json::from_value::<ProviderRequest>(req.clone()) {
                        current_request = mutated;
                    }
                }
            }

            match self
                .attempt_with_retries(name, current_request.clone())
                .await
            {
                Ok(response) => {
                    let duration_ms = start.elapsed().as_millis().max(1) as u64;
                    return self.response_to_result(response, name, duration_ms);
                }
                Err(_last_error) => continue,
            }
        }

        let duration_ms = start.elapsed().as_millis().max(1) as u64;
        DimensionResult::err_with_metadata(
            Error::ProviderExhausted {
                dimension: dimension.to_string(),
                tried: tried.clone(),
            }
            .to_string(),
            ResultMetadata {
                duration_ms: Some(duration_ms),
                ..Default::default()
            },
        )
    }

    /// Looks the provider up fresh on every attempt, per `EngineConfig`, so an
    /// unregistered name is a recoverable per-attempt failure — it counts against
    /// retries/fallback like any other attempt failure, never a panic.
    async fn attempt_with_retries(
        &self,
        provider_name: &str,
        mut request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, String> {
        let mut last_error = String::from("unknown provider error");

        for attempt in 0..=self.max_retries {
            let response = match self.registry.get(provider_name) {
                Ok(provider) => {
                    let before = self
                        .dispatcher
                        .before_provider_execute(
                            serde_json::to_value(&request).unwrap_or(Value::Null),
                        )
                        .await;
                    if let Ok(mutated) = serde_json::from_value::<ProviderRequest>(before) {
                        request = mutated;
                    }

                    let response = provider.execute(request.clone()).await;

                    let after = self
                        .dispatcher
                        .after_provider_execute(
                            serde_json::to_value(&response).unwrap_or(Value::Null),
                        )
                        .await;
                    serde_json::from_value(after).unwrap_or(response)
                }
                Err(err) => ProviderResponse {
                    error: Some(err.to_string()),
                    ..Default::default()
                },
            };

            if !response.is_error() {
                return Ok(response);
            }

            last_error = response
                .error
                .clone()
                .unwrap_or_else(|| "unknown provider error".to_string());

            if attempt < self.max_retries {
                let overrides = self.dispatcher.handle_retry(attempt, &last_error).await;
                let mut delay = self.retry_delay * 2u32.pow(attempt);
                if let Some(ms) = overrides.get("retryDelay").and_then(Value::as_u64) {
                    delay = Duration::from_millis(ms);
                } else {
                    // Small jitter on top of the backoff base to avoid synchronized
                    // retry storms across sections hitting the same provider; additive
                    // only, so minimum-gap timing stays predictable.
                    delay += Duration::from_millis(rand::random::<u64>() % 25);
                }
                if let Some(req) = overrides.get("request") {
                    if let Ok(mutated) = serde_json::from_value::<ProviderRequest>(req.clone()) {
                        request = mutated;
                    }
                }
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }

    fn response_to_result(
        &self,
        response: ProviderResponse,
        provider_name: &str,
        duration_ms: u64,
    ) -> DimensionResult {
        let mut metadata = response.metadata.unwrap_or_default();
        metadata.provider = Some(provider_name.to_string());
        metadata.duration_ms = Some(duration_ms);
        DimensionResult::ok_with_metadata(response.data.unwrap_or(Value::Null), metadata)
    }
}

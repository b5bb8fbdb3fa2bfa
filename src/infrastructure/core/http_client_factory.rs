//! Shared HTTP client construction: a retrying `reqwest` client built once
//! and cloned cheaply (it's an `Arc` internally) by every outbound caller
//! (advisor client, exchange REST client).

use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

/// Builds a client that retries transient failures (timeout, connect error,
/// 5xx) up to `max_retries` times with exponential backoff, matching the
/// gateway/advisor retry contract in spec.md §4.2/§4.4 (N=2, total 3 attempts).
pub fn build_retrying_client(timeout: Duration, max_retries: u32) -> anyhow::Result<ClientWithMiddleware> {
    let base = reqwest::Client::builder().timeout(timeout).build()?;
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
    Ok(ClientBuilder::new(base)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

/// A client with no retry middleware, for callers that implement their own
/// retry/circuit-breaker policy on top (the advisor client does).
pub fn build_plain_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

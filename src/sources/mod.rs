//! Provider adapters and the shared HTTP plumbing they sit on. Every
//! external call goes through the per-provider rate limiter and circuit
//! breaker; transient failures are retried here so callers see either a
//! result or a classified error.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use http_cache_reqwest::{CACacheManager, Cache, CacheMode, HttpCache, HttpCacheOptions};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::MedlitError;

pub mod adapter;
pub mod biorxiv;
pub mod breaker;
pub mod clinicaltrials;
pub mod crossref;
pub mod europepmc;
pub mod fulltext;
pub mod icite;
pub mod openalex;
pub mod pubmed;
pub mod pubtator;
pub mod rate_limit;
pub mod semanticscholar;
pub mod unpaywall;

const USER_AGENT: &str = concat!("medlit/", env!("CARGO_PKG_VERSION"));
const BODY_LIMIT: usize = 8 * 1024 * 1024;
const MAX_RETRIES: u32 = 3;

static CACHE_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable the HTTP response cache for the rest of the process (the
/// `--no-cache` flag).
pub fn disable_http_cache() {
    CACHE_DISABLED.store(true, Ordering::SeqCst);
}

/// Shared HTTP client: connection pool, client-side response cache, and
/// transient-error retry middleware. One instance per process.
pub fn shared_client() -> Result<ClientWithMiddleware, MedlitError> {
    static CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let base = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .build()?;
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
    let client = reqwest_middleware::ClientBuilder::new(base)
        .with(Cache(HttpCache {
            mode: CacheMode::Default,
            manager: CACacheManager::default(),
            options: HttpCacheOptions::default(),
        }))
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();
    Ok(CLIENT.get_or_init(|| client).clone())
}

/// Per-request cache override honoring the process-wide `--no-cache` flag.
pub fn apply_cache_mode(
    req: reqwest_middleware::RequestBuilder,
) -> reqwest_middleware::RequestBuilder {
    if CACHE_DISABLED.load(Ordering::SeqCst) {
        req.with_extension(CacheMode::NoStore)
    } else {
        req
    }
}

/// Base URL for a provider, overridable via environment for tests.
pub fn env_base(default: &'static str, env_var: &'static str) -> Cow<'static, str> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Cow::Owned(value.trim().to_string()),
        _ => Cow::Borrowed(default),
    }
}

/// Read a response body up to a fixed cap so a misbehaving provider cannot
/// exhaust memory.
pub async fn read_limited_body(
    mut resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, MedlitError> {
    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if out.len() + chunk.len() > BODY_LIMIT {
            return Err(MedlitError::Api {
                api: api.to_string(),
                message: format!("Response body exceeded {BODY_LIMIT} bytes"),
            });
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Short printable excerpt of a body for error messages.
pub fn body_excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    let mut excerpt: String = trimmed.chars().take(300).collect();
    if trimmed.chars().count() > 300 {
        excerpt.push('…');
    }
    excerpt
}

fn parse_retry_after(resp: &reqwest::Response, attempt: u32) -> f64 {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or_else(|| f64::from(2u32.saturating_pow(attempt + 1)))
}

/// Send a request with bounded retries: 429 honors `Retry-After` (falling
/// back to exponential backoff), transient network errors back off
/// exponentially, anything else is returned to the caller unchanged.
pub async fn retry_send<F, Fut>(
    api: &str,
    max_retries: u32,
    build: F,
) -> Result<reqwest::Response, MedlitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest_middleware::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match build().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                let wait = parse_retry_after(&resp, attempt);
                if attempt >= max_retries {
                    return Err(MedlitError::RateLimited {
                        api: api.to_string(),
                        retry_after: Some(wait),
                    });
                }
                warn!(api, attempt, wait, "rate limited, backing off");
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            }
            Ok(resp) => return Ok(resp),
            Err(err) => {
                let transient = match &err {
                    reqwest_middleware::Error::Reqwest(e) => e.is_timeout() || e.is_connect(),
                    reqwest_middleware::Error::Middleware(_) => true,
                };
                if !transient || attempt >= max_retries {
                    return Err(err.into());
                }
                let wait = f64::from(2u32.saturating_pow(attempt + 1));
                debug!(api, attempt, wait, "transient error, backing off");
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            }
        }
        attempt += 1;
    }
}

/// The full guarded request path every adapter call goes through: circuit
/// breaker gate, rate-limiter token, cache mode, retrying send, breaker
/// bookkeeping. Not-found responses count as successes for the breaker.
pub async fn guarded_send<F>(api: &'static str, build: F) -> Result<reqwest::Response, MedlitError>
where
    F: Fn() -> reqwest_middleware::RequestBuilder,
{
    let breaker = breaker::breaker(api);
    breaker.try_acquire()?;
    rate_limit::acquire(api, None).await?;

    let result = retry_send(api, MAX_RETRIES, || {
        apply_cache_mode(build()).send()
    })
    .await;

    match &result {
        Ok(resp) => {
            let status = resp.status();
            if status.is_server_error() {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        Err(err) if err.retryable() => breaker.record_failure(),
        Err(_) => breaker.record_success(),
    }
    result
}

/// GET-and-decode helper shared by the JSON adapters. Non-success statuses
/// become `Api` errors with a body excerpt; invalid JSON becomes `ApiJson`.
pub async fn get_json<T, F>(api: &'static str, build: F) -> Result<T, MedlitError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest_middleware::RequestBuilder,
{
    let resp = guarded_send(api, build).await?;
    let status = resp.status();
    let bytes = read_limited_body(resp, api).await?;
    if !status.is_success() {
        let excerpt = body_excerpt(&bytes);
        return Err(MedlitError::Api {
            api: api.to_string(),
            message: format!("HTTP {status}: {excerpt}"),
        });
    }
    serde_json::from_slice(&bytes).map_err(|source| MedlitError::ApiJson {
        api: api.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn body_excerpt_truncates_long_bodies() {
        let body = "x".repeat(1000);
        let excerpt = body_excerpt(body.as_bytes());
        assert!(excerpt.chars().count() <= 301);
        assert!(excerpt.ends_with('…'));
    }

    #[test]
    fn env_base_prefers_non_empty_override() {
        // Env mutation is safe here: test-only variable nothing else reads.
        unsafe { std::env::set_var("MEDLIT_TEST_BASE_A", "http://localhost:9") };
        assert_eq!(
            env_base("https://example.org", "MEDLIT_TEST_BASE_A").as_ref(),
            "http://localhost:9"
        );
        unsafe { std::env::set_var("MEDLIT_TEST_BASE_A", "  ") };
        assert_eq!(
            env_base("https://example.org", "MEDLIT_TEST_BASE_A").as_ref(),
            "https://example.org"
        );
    }

    #[tokio::test]
    async fn retry_send_honors_retry_after_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = shared_client().unwrap();
        let url = format!("{}/thing", server.uri());
        let resp = retry_send("test", 3, || client.get(&url).send())
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn retry_send_gives_up_after_max_retries_on_429() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/always429"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let client = shared_client().unwrap();
        let url = format!("{}/always429", server.uri());
        let err = retry_send("test", 1, || client.get(&url).send())
            .await
            .expect_err("exhausted retries should error");
        assert!(matches!(err, MedlitError::RateLimited { .. }));
        assert!(err.retryable());
    }
}

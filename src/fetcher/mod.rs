//! # Fetcher
//!
//! Rate-limited HTTP GET with a rotating browser identity and a bounded retry loop.
//!
//! The fetcher knows nothing about page semantics. It owns the per-run anti-blocking state:
//! the current identity, the consecutive 403 counter and the escalating backoff. A new
//! `Fetcher` is built for every crawl run, so repeated or overlapping runs never share
//! counters.
//!
//! ## Retry policy
//!
//! - A 2xx response resets the 403 counter and the backoff, then sleeps a randomized throttle
//!   (`uniform(min_delay, max_delay) + uniform(0, jitter)`) before returning the body.
//! - A 403 bumps the counter. Once it reaches `rejection_threshold`, the next attempt is
//!   preceded by a sleep of `backoff × (rejections − threshold + 1)`, a counter reset and an
//!   identity rotation.
//! - Every failed attempt except the last waits before retrying: the doubled backoff after a
//!   403, a randomized delay otherwise. The identity rotates before each retry.
//! - After `max_retries` attempts the last failure is wrapped in
//!   [`FetchError::RetryExhausted`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info, warn};

use crate::error::{FetchError, TransportError};
use crate::traits::{HttpTransport, RawResponse};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7",
    "en-US,en;q=0.9,tr;q=0.8",
    "tr;q=0.9,en-US;q=0.8,en;q=0.7",
];

/// Headers sent with every identity
const STATIC_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
    ),
    (
        "sec-ch-ua",
        "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
    ("cache-control", "max-age=0"),
];

/// Tunables of the throttle and retry loop
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Total attempts per URL, including the first one
    pub max_retries: u32,
    pub rejection_threshold: u32,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            jitter: Duration::from_millis(2000),
            max_retries: 3,
            rejection_threshold: 2,
            backoff_base: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The header fingerprint presented to the upstream site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
}

impl Identity {
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for &(name, value) in STATIC_HEADERS {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        for (name, value) in [
            (header::USER_AGENT, &self.user_agent),
            (header::ACCEPT_LANGUAGE, &self.accept_language),
            (header::REFERER, &self.referer),
        ] {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!("Skipping invalid {} header value: {:?}", name, value),
            }
        }

        headers
    }
}

/// Candidate values an identity is drawn from
#[derive(Debug, Clone)]
pub struct IdentityPool {
    user_agents: Vec<String>,
    accept_languages: Vec<String>,
    referers: Vec<String>,
}

impl IdentityPool {
    /// Browser fingerprints plus referers that look like in-site navigation or a search click
    pub fn for_site(base_url: &str, listing_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let mut referers = vec![format!("{base}/"), listing_url.to_string()];
        if let Some((locale_root, _)) = listing_url.rsplit_once('/')
            && locale_root.len() > base.len()
        {
            referers.push(locale_root.to_string());
        }
        referers.push("https://www.google.com/".to_string());

        Self {
            user_agents: USER_AGENTS.iter().map(ToString::to_string).collect(),
            accept_languages: ACCEPT_LANGUAGES.iter().map(ToString::to_string).collect(),
            referers,
        }
    }

    fn pick(&self, rng: &mut StdRng) -> Identity {
        Identity {
            user_agent: pick_one(&self.user_agents, rng),
            accept_language: pick_one(&self.accept_languages, rng),
            referer: pick_one(&self.referers, rng),
        }
    }
}

fn pick_one(pool: &[String], rng: &mut StdRng) -> String {
    pool.choose(rng).cloned().unwrap_or_default()
}

/// Uniformly random duration in `[lo, hi]`, tolerant of swapped bounds
pub(crate) fn uniform_delay(rng: &mut impl Rng, lo: Duration, hi: Duration) -> Duration {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let lo_ms = u64::try_from(lo.as_millis()).unwrap_or(u64::MAX);
    let hi_ms = u64::try_from(hi.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rng.gen_range(lo_ms..=hi_ms))
}

/// Production transport backed by a cookie-keeping `reqwest::Client`
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, identity: &Identity) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .headers(identity.headers())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RawResponse { status, body })
    }
}

/// Per-run HTTP client state: identity, rejection counter and backoff
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    policy: FetchPolicy,
    pool: IdentityPool,
    identity: Identity,
    rng: StdRng,
    consecutive_rejections: u32,
    backoff: Duration,
    rotations: u64,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: FetchPolicy, pool: IdentityPool) -> Self {
        Self::with_rng(transport, policy, pool, StdRng::from_entropy())
    }

    pub fn with_rng(
        transport: Arc<dyn HttpTransport>,
        policy: FetchPolicy,
        pool: IdentityPool,
        mut rng: StdRng,
    ) -> Self {
        let identity = pool.pick(&mut rng);
        let backoff = policy.backoff_base;

        Self {
            transport,
            policy,
            pool,
            identity,
            rng,
            consecutive_rejections: 0,
            backoff,
            rotations: 0,
        }
    }

    /// Fetch `url`, retrying per the policy.
    ///
    /// # Returns
    /// * `Result<String, FetchError>` - The response body, or `RetryExhausted` carrying the last failure
    pub async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if self.consecutive_rejections >= self.policy.rejection_threshold {
                let window = self.rejection_window();
                warn!(
                    "{} consecutive 403s, backing off for {:?} before {}",
                    self.consecutive_rejections, window, url
                );
                tokio::time::sleep(window).await;
                self.consecutive_rejections = 0;
                self.rotate_identity();
            }

            debug!("Requesting {} (attempt {}/{})", url, attempt, max_attempts);

            let failure = match self.transport.get(url, &self.identity).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    self.consecutive_rejections = 0;
                    self.backoff = self.policy.backoff_base;
                    self.throttle().await;
                    return Ok(response.body);
                }
                Ok(response) if response.status == 403 => {
                    self.consecutive_rejections += 1;
                    FetchError::Blocked {
                        url: url.to_string(),
                    }
                }
                Ok(response) => FetchError::Status {
                    url: url.to_string(),
                    status: response.status,
                },
                Err(err) => FetchError::Transport {
                    url: url.to_string(),
                    message: err.to_string(),
                },
            };

            warn!("Request attempt {} failed: {}", attempt, failure);

            if attempt >= max_attempts {
                return Err(FetchError::RetryExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            let delay = if failure.is_blocked() {
                self.backoff = self.backoff.saturating_mul(2);
                info!("403 received, backoff raised to {:?}", self.backoff);
                self.backoff
            } else {
                uniform_delay(&mut self.rng, self.policy.min_delay, self.policy.max_delay)
            };

            debug!("Waiting {:?} before retrying {}", delay, url);
            tokio::time::sleep(delay).await;
            self.rotate_identity();
        }
    }

    /// Current backoff; the crawler waits this long before re-attempting a blocked page
    pub fn backoff_window(&self) -> Duration {
        self.backoff
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    fn rejection_window(&self) -> Duration {
        let excess = self
            .consecutive_rejections
            .saturating_sub(self.policy.rejection_threshold)
            + 1;
        self.backoff.saturating_mul(excess)
    }

    fn rotate_identity(&mut self) {
        self.identity = self.pool.pick(&mut self.rng);
        self.rotations += 1;
        debug!("Rotated identity to {}", self.identity.user_agent);
    }

    async fn throttle(&mut self) {
        let base = uniform_delay(&mut self.rng, self.policy.min_delay, self.policy.max_delay);
        let jitter = uniform_delay(&mut self.rng, Duration::ZERO, self.policy.jitter);
        tokio::time::sleep(base + jitter).await;
    }
}

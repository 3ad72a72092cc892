//! Runtime settings read from the environment (after `.env` is loaded by `main`)

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::crawler::CrawlSettings;
use crate::detector::ChangeDetector;
use crate::extractor::SiteSelectors;
use crate::fetcher::FetchPolicy;

const DEFAULT_DATABASE_URL: &str = "sqlite:database/rtp.db";
const DEFAULT_SCHEDULE: &str = "0 0 */6 * * *";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    /// Discord notifications are disabled when unset
    pub discord_webhook_url: Option<String>,
    /// Cron expression for recurring crawls, `None` to crawl once and exit
    pub schedule: Option<String>,
    pub fetch: FetchPolicy,
    pub crawl: CrawlSettings,
    pub detector: ChangeDetector,
    pub selectors: SiteSelectors,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup, falling back to defaults for missing or blank keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let fetch_defaults = FetchPolicy::default();
        let crawl_defaults = CrawlSettings::default();
        let detector_defaults = ChangeDetector::default();

        let schedule = match env.string("RTP_CRAWL_SCHEDULE") {
            Some(value) if value.eq_ignore_ascii_case("off") => None,
            Some(value) => Some(value),
            None => Some(DEFAULT_SCHEDULE.to_string()),
        };

        let fetch = FetchPolicy {
            min_delay: env.secs("RTP_MIN_DELAY_SECS", fetch_defaults.min_delay)?,
            max_delay: env.secs("RTP_MAX_DELAY_SECS", fetch_defaults.max_delay)?,
            jitter: env.millis("RTP_JITTER_MS", fetch_defaults.jitter)?,
            max_retries: env.parse("RTP_MAX_RETRIES", fetch_defaults.max_retries)?,
            rejection_threshold: env
                .parse("RTP_REJECTION_THRESHOLD", fetch_defaults.rejection_threshold)?,
            backoff_base: env.secs("RTP_BACKOFF_SECS", fetch_defaults.backoff_base)?,
            request_timeout: env.secs("RTP_REQUEST_TIMEOUT_SECS", fetch_defaults.request_timeout)?,
        };

        let crawl = CrawlSettings {
            base_url: env
                .string("RTP_BASE_URL")
                .unwrap_or(crawl_defaults.base_url),
            listing_url: env
                .string("RTP_LISTING_URL")
                .unwrap_or(crawl_defaults.listing_url),
            max_pages: env.parse("RTP_MAX_PAGES", crawl_defaults.max_pages)?,
            max_page_attempts: env
                .parse("RTP_MAX_PAGE_ATTEMPTS", crawl_defaults.max_page_attempts)?,
            page_delay_min: env.secs("RTP_PAGE_DELAY_MIN_SECS", crawl_defaults.page_delay_min)?,
            page_delay_max: env.secs("RTP_PAGE_DELAY_MAX_SECS", crawl_defaults.page_delay_max)?,
        };

        url::Url::parse(&crawl.listing_url)
            .with_context(|| format!("RTP_LISTING_URL is not a valid URL: {}", crawl.listing_url))?;
        url::Url::parse(&crawl.base_url)
            .with_context(|| format!("RTP_BASE_URL is not a valid URL: {}", crawl.base_url))?;

        let detector = ChangeDetector {
            noise_threshold: env
                .parse("RTP_NOISE_THRESHOLD", detector_defaults.noise_threshold)?,
            significance_threshold: env.parse(
                "RTP_SIGNIFICANCE_THRESHOLD",
                detector_defaults.significance_threshold,
            )?,
        };

        Ok(Self {
            database_url: env
                .string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            discord_webhook_url: env.string("DISCORD_WEBHOOK_URL"),
            schedule,
            fetch,
            crawl,
            detector,
            selectors: SiteSelectors::default(),
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid value for {key}: {raw:?}")),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        Ok(Duration::from_secs(self.parse(key, default.as_secs())?))
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Ok(Duration::from_millis(self.parse(key, default)?))
    }
}

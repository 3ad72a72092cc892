use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::crawler::Crawler;
use crate::database::Database;
use crate::discord::DiscordNotifier;
use crate::extractor::Extractor;
use crate::fetcher::{Fetcher, IdentityPool, ReqwestTransport};
use crate::models::CrawlSummary;
use crate::traits::{GameStore, HttpTransport, Notifier};

#[derive(Clone)]
pub struct RtpMonitor {
    settings: Arc<Settings>,
    store: Arc<dyn GameStore>,
    transport: Arc<dyn HttpTransport>,
    notifier: Arc<dyn Notifier>,
    extractor: Arc<Extractor>,
    /// Held for the whole of a run
    running: Arc<Mutex<()>>,
}

impl RtpMonitor {
    pub async fn new(settings: Settings) -> Result<Self> {
        let database = Database::new(&settings.database_url)
            .await
            .with_context(|| format!("opening database {}", settings.database_url))?;
        let transport = ReqwestTransport::new(settings.fetch.request_timeout)
            .context("building HTTP client")?;
        let notifier = DiscordNotifier::new(settings.discord_webhook_url.clone());

        Self::with_parts(
            settings,
            Arc::new(database),
            Arc::new(transport),
            Arc::new(notifier),
        )
    }

    pub fn with_parts(
        settings: Settings,
        store: Arc<dyn GameStore>,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let extractor = Extractor::new(&settings.selectors).context("compiling site selectors")?;

        Ok(Self {
            settings: Arc::new(settings),
            store,
            transport,
            notifier,
            extractor: Arc::new(extractor),
            running: Arc::new(Mutex::new(())),
        })
    }

    /// One full crawl: fetch, extract, detect, store, then alert on the significant changes.
    ///
    /// Waits for a run already in progress to finish first.
    pub async fn run_crawl(&self) -> CrawlSummary {
        let _guard = self.running.lock().await;
        self.crawl().await
    }

    /// Like [`run_crawl`](Self::run_crawl), but returns `None` instead of waiting when a run is
    /// already in progress. Used by the scheduler so slow runs never pile up.
    pub async fn run_exclusive(&self) -> Option<CrawlSummary> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous crawl still running, skipping this one");
            return None;
        };

        Some(self.crawl().await)
    }

    async fn crawl(&self) -> CrawlSummary {
        let settings = &self.settings;
        let mut fetcher = Fetcher::new(
            self.transport.clone(),
            settings.fetch.clone(),
            IdentityPool::for_site(&settings.crawl.base_url, &settings.crawl.listing_url),
        );

        let report = Crawler::new(
            &mut fetcher,
            &self.extractor,
            &settings.detector,
            self.store.as_ref(),
            &settings.crawl,
        )
        .run()
        .await;

        info!("Crawl used {} identity rotations", fetcher.rotations());

        if !report.significant.is_empty() {
            info!("Sending {} significant changes", report.significant.len());
            if let Err(e) = self.notifier.notify(&report.significant).await {
                error!("Error sending notifications: {:#}", e);
            }
        }

        report.summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::crawler::CrawlSettings;
    use crate::models::SignificantChange;
    use crate::testing::{DetailPage, ScriptedTransport, instant_policy, listing_page};

    const LISTING: &str = "https://casino.test/tr/games";

    #[derive(Default)]
    struct RecordingNotifier {
        batches: StdMutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, changes: &[SignificantChange]) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push(changes.iter().map(|c| c.game.name.clone()).collect());
            anyhow::bail!("webhook down")
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::from_lookup(|_| None).unwrap();
        settings.fetch = instant_policy();
        settings.crawl = CrawlSettings {
            base_url: "https://casino.test".to_string(),
            listing_url: LISTING.to_string(),
            max_pages: 5,
            max_page_attempts: 3,
            page_delay_min: Duration::ZERO,
            page_delay_max: Duration::ZERO,
        };
        settings
    }

    fn script(transport: &ScriptedTransport, rtp: f64) {
        transport.push_forever(LISTING, 200, &listing_page(&["/tr/play/slots/book-of-ra"]));
        transport.push_forever(
            "https://casino.test/tr/games?page=2",
            200,
            &listing_page(&[]),
        );
        transport.push_forever(
            "https://casino.test/tr/play/slots/book-of-ra",
            200,
            &DetailPage::new("Book of Ra", "Novomatic")
                .rtp(rtp, 95.0, 95.0, 95.0)
                .render(),
        );
    }

    async fn monitor(
        transport: Arc<ScriptedTransport>,
        notifier: Arc<RecordingNotifier>,
    ) -> RtpMonitor {
        let db = Database::in_memory().await.unwrap();
        RtpMonitor::with_parts(test_settings(), Arc::new(db), transport, notifier).unwrap()
    }

    #[tokio::test]
    async fn significant_changes_are_notified_once_per_run() {
        let transport = Arc::new(ScriptedTransport::new());
        script(&transport, 96.0);
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = monitor(transport.clone(), notifier.clone()).await;

        let first = monitor.run_crawl().await;
        assert_eq!(first.total_games_processed, 1);
        assert!(notifier.batches.lock().unwrap().is_empty());

        script(&transport, 97.5);
        // a failing notifier does not fail the run
        let second = monitor.run_crawl().await;

        assert_eq!(second.significant_changes, 1);
        assert_eq!(
            *notifier.batches.lock().unwrap(),
            vec![vec!["Book of Ra".to_string()]]
        );
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped() {
        let transport = Arc::new(ScriptedTransport::new());
        script(&transport, 96.0);
        let monitor = monitor(transport.clone(), Arc::new(RecordingNotifier::default())).await;

        let guard = monitor.running.lock().await;
        assert!(monitor.run_exclusive().await.is_none());
        assert_eq!(transport.total_requests(), 0);
        drop(guard);

        let summary = monitor.run_exclusive().await.unwrap();
        assert_eq!(summary.total_games_processed, 1);
    }
}

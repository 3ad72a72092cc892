//! Pagination-driven crawl of the game catalog.
//!
//! One page at a time, one game at a time: listing page → detail links → detail page → change
//! detection and storage → next link. The only suspension points are the fetcher's sleeps and
//! the pause between pages, so dropping the crawl future between two games leaves storage in a
//! consistent state.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::detector::ChangeDetector;
use crate::error::CrawlError;
use crate::extractor::Extractor;
use crate::fetcher::{Fetcher, uniform_delay};
use crate::models::{CrawlErrorEntry, CrawlSummary, SignificantChange};
use crate::traits::GameStore;

/// Where and how far to crawl
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSettings {
    /// Origin used to resolve relative detail links
    pub base_url: String,
    /// First page of the game catalog
    pub listing_url: String,
    pub max_pages: u32,
    /// How many times a blocked page is attempted before the crawl moves on
    pub max_page_attempts: u32,
    pub page_delay_min: Duration,
    pub page_delay_max: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            base_url: "https://bitcasino.io".to_string(),
            listing_url: "https://bitcasino.io/tr/games".to_string(),
            max_pages: 122,
            max_page_attempts: 3,
            page_delay_min: Duration::from_secs(15),
            page_delay_max: Duration::from_secs(25),
        }
    }
}

impl CrawlSettings {
    /// Page 1 is the bare listing URL, later pages add a `page` query parameter
    pub fn page_url(&self, page: u32) -> String {
        if page <= 1 {
            self.listing_url.clone()
        } else if self.listing_url.contains('?') {
            format!("{}&page={page}", self.listing_url)
        } else {
            format!("{}?page={page}", self.listing_url)
        }
    }
}

/// Summary plus the alerts to hand to the notifier
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub summary: CrawlSummary,
    pub significant: Vec<SignificantChange>,
}

enum PageOutcome {
    Completed,
    EndOfCatalog,
    Blocked,
    Failed,
}

pub struct Crawler<'a> {
    fetcher: &'a mut Fetcher,
    extractor: &'a Extractor,
    detector: &'a ChangeDetector,
    store: &'a dyn GameStore,
    settings: &'a CrawlSettings,
    rng: StdRng,
    /// Detail URLs already stored during this run
    completed: HashSet<String>,
    /// Detail URLs that failed for a non-blocking reason during this run
    failed: HashSet<String>,
    report: CrawlReport,
}

impl<'a> Crawler<'a> {
    pub fn new(
        fetcher: &'a mut Fetcher,
        extractor: &'a Extractor,
        detector: &'a ChangeDetector,
        store: &'a dyn GameStore,
        settings: &'a CrawlSettings,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            detector,
            store,
            settings,
            rng: StdRng::from_entropy(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            report: CrawlReport::default(),
        }
    }

    /// Crawl until the catalog runs out or `max_pages` is reached.
    ///
    /// Never fails: every problem ends up in [`CrawlSummary::errors`].
    pub async fn run(mut self) -> CrawlReport {
        info!("Starting crawl of {}", self.settings.listing_url);

        let mut page = 1;
        let mut attempts = 0;

        while page <= self.settings.max_pages {
            attempts += 1;
            info!("Processing page {} (attempt {})", page, attempts);

            match self.crawl_page(page).await {
                PageOutcome::EndOfCatalog => {
                    info!("No games found on page {}, stopping pagination", page);
                    break;
                }
                PageOutcome::Blocked if attempts < self.settings.max_page_attempts => {
                    let window = self.fetcher.backoff_window();
                    warn!("Blocked on page {}, retrying the page after {:?}", page, window);
                    tokio::time::sleep(window).await;
                    continue;
                }
                PageOutcome::Blocked => {
                    warn!("Page {} still blocked after {} attempts, moving on", page, attempts);
                    self.report.summary.errors.push(CrawlErrorEntry::for_page(
                        page,
                        format!("blocked after {attempts} attempts"),
                    ));
                }
                PageOutcome::Completed => {
                    self.report.summary.last_processed_page = page;
                    info!(
                        "Completed page {}. Total games: {}",
                        page,
                        self.completed.len()
                    );
                }
                PageOutcome::Failed => {}
            }

            page += 1;
            attempts = 0;

            if page <= self.settings.max_pages {
                let pause = uniform_delay(
                    &mut self.rng,
                    self.settings.page_delay_min,
                    self.settings.page_delay_max,
                );
                debug!("Pausing {:?} before page {}", pause, page);
                tokio::time::sleep(pause).await;
            }
        }

        if page > self.settings.max_pages {
            info!("Reached the page limit ({})", self.settings.max_pages);
        }

        self.report.summary.total_games_processed = self.completed.len();
        info!(
            "Crawl finished: {} games, {} changes ({} significant), {} errors",
            self.report.summary.total_games_processed,
            self.report.summary.total_changes,
            self.report.summary.significant_changes,
            self.report.summary.errors.len()
        );

        self.report
    }

    async fn crawl_page(&mut self, page: u32) -> PageOutcome {
        let page_url = self.settings.page_url(page);

        let html = match self.fetcher.fetch(&page_url).await {
            Ok(html) => html,
            Err(err) if err.is_blocked() => return PageOutcome::Blocked,
            Err(err) => {
                warn!("Listing page {} failed: {}", page, err);
                self.report
                    .summary
                    .errors
                    .push(CrawlErrorEntry::for_page(page, err));
                return PageOutcome::Failed;
            }
        };

        let links = self.extractor.extract_links(&html, &self.settings.base_url);
        if links.is_empty() {
            return PageOutcome::EndOfCatalog;
        }
        info!("Found {} games on page {}", links.len(), page);

        for url in links {
            if self.completed.contains(&url) || self.failed.contains(&url) {
                debug!("Skipping {}, already processed in this run", url);
                continue;
            }

            match self.crawl_game(&url).await {
                Ok(()) => {
                    self.completed.insert(url);
                }
                Err(err) if err.is_blocked() => {
                    warn!("Blocked while fetching {}", url);
                    return PageOutcome::Blocked;
                }
                Err(err) => {
                    warn!("Failed to process {}: {}", url, err);
                    self.report
                        .summary
                        .errors
                        .push(CrawlErrorEntry::for_url(&url, err));
                    self.failed.insert(url);
                }
            }
        }

        PageOutcome::Completed
    }

    async fn crawl_game(&mut self, url: &str) -> Result<(), CrawlError> {
        let html = self.fetcher.fetch(url).await?;
        let extraction = self.extractor.extract(&html, url, Utc::now())?;

        for warning in &extraction.warnings {
            warn!("{}: {}", url, warning);
        }

        let observation = self.detector.observe(self.store, &extraction.record).await?;
        debug!(
            "Stored {} as game {} ({})",
            url, observation.game.id, observation.game.slug
        );

        if observation.change.is_some() {
            self.report.summary.total_changes += 1;
        }
        if let Some(alert) = observation.significant {
            self.report.summary.significant_changes += 1;
            self.report.significant.push(alert);
        }

        Ok(())
    }
}

//! Test doubles and HTML fixtures shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use crate::database::slugify;
use crate::error::{PersistenceError, TransportError};
use crate::fetcher::{FetchPolicy, Identity};
use crate::models::{
    ChangeRecord, GameEntity, GameIdentity, GameRecord, NewChangeRecord, Provider,
};
use crate::traits::{GameStore, HttpTransport, RawResponse};

/// Policy with every delay set to zero
pub fn instant_policy() -> FetchPolicy {
    FetchPolicy {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter: Duration::ZERO,
        max_retries: 3,
        rejection_threshold: 2,
        backoff_base: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    }
}

pub fn observed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 10, 7, 31, 2).unwrap()
}

type Scripted = Result<RawResponse, String>;

/// Transport answering from per-URL scripts. Unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Mutex<HashMap<String, RawResponse>>,
    requests: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next request for `url` once
    pub fn push(&self, url: &str, status: u16, body: &str) {
        self.queue(url, Ok(RawResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_error(&self, url: &str, message: &str) {
        self.queue(url, Err(message.to_string()));
    }

    /// Answer every request for `url` that has no queued response
    pub fn push_forever(&self, url: &str, status: u16, body: &str) {
        self.fallback.lock().unwrap().insert(
            url.to_string(),
            RawResponse {
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == url)
            .count()
    }

    /// When each request for `url` was sent, oldest first
    pub fn requested_at(&self, url: &str) -> Vec<Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == url)
            .map(|&(_, at)| at)
            .collect()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn queue(&self, url: &str, response: Scripted) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str, _identity: &Identity) -> Result<RawResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);

        match queued {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError(message)),
            None => Ok(self
                .fallback
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or(RawResponse {
                    status: 404,
                    body: String::new(),
                })),
        }
    }
}

/// `GameStore` kept in memory, optionally refusing writes for one game name
#[derive(Default)]
pub struct MemoryStore {
    providers: Mutex<Vec<Provider>>,
    games: Mutex<Vec<GameEntity>>,
    changes: Mutex<Vec<ChangeRecord>>,
    conflict_on: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts of `name` fail as if another writer had won the unique index
    pub fn conflicting_on(name: &str) -> Self {
        Self {
            conflict_on: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn game_names(&self) -> Vec<String> {
        self.games
            .lock()
            .unwrap()
            .iter()
            .map(|game| game.name.clone())
            .collect()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn find_provider_by_name(&self, name: &str) -> Result<Option<Provider>, PersistenceError> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|provider| provider.name == name)
            .cloned())
    }

    async fn create_provider(&self, name: &str) -> Result<Provider, PersistenceError> {
        let mut providers = self.providers.lock().unwrap();
        if let Some(existing) = providers.iter().find(|provider| provider.name == name) {
            return Ok(existing.clone());
        }

        let provider = Provider {
            id: providers.len() as i64 + 1,
            name: name.to_string(),
            slug: slugify(name),
        };
        providers.push(provider.clone());
        Ok(provider)
    }

    async fn find_game_by_identity(
        &self,
        identity: &GameIdentity,
    ) -> Result<Option<GameEntity>, PersistenceError> {
        Ok(self
            .games
            .lock()
            .unwrap()
            .iter()
            .find(|game| game.name == identity.name && game.provider_id == identity.provider_id)
            .cloned())
    }

    async fn upsert_game(
        &self,
        identity: &GameIdentity,
        record: &GameRecord,
    ) -> Result<GameEntity, PersistenceError> {
        if self.conflict_on.as_deref() == Some(identity.name.as_str()) {
            return Err(PersistenceError::Conflict {
                name: identity.name.clone(),
                provider_id: identity.provider_id,
            });
        }

        let mut games = self.games.lock().unwrap();
        let position = games
            .iter()
            .position(|game| game.name == identity.name && game.provider_id == identity.provider_id);
        let (id, slug) = match position {
            Some(index) => (games[index].id, games[index].slug.clone()),
            None => (games.len() as i64 + 1, slugify(&identity.name)),
        };

        let game = GameEntity {
            id,
            provider_id: identity.provider_id,
            name: identity.name.clone(),
            slug,
            category: record.category.clone(),
            image: None,
            theoretical_rtp: record.theoretical_rtp,
            current_rtp: record.current_rtp,
            daily_rtp: record.daily_rtp,
            weekly_rtp: record.weekly_rtp,
            monthly_rtp: record.monthly_rtp,
            hit_ratio: record.hit_ratio,
            risk_level: (!record.risk_level.is_empty()).then(|| record.risk_level.clone()),
            paylines: record.paylines,
            min_bet: record.min_bet,
            max_bet: record.max_bet,
            is_trending: false,
            is_popular: false,
            is_hot: false,
            last_updated: Some(record.observed_at),
        };

        match position {
            Some(index) => games[index] = game.clone(),
            None => games.push(game.clone()),
        }
        Ok(game)
    }

    async fn insert_change_record(
        &self,
        change: &NewChangeRecord,
    ) -> Result<ChangeRecord, PersistenceError> {
        let mut changes = self.changes.lock().unwrap();
        let record = ChangeRecord {
            id: changes.len() as i64 + 1,
            change: change.clone(),
        };
        changes.push(record.clone());
        Ok(record)
    }
}

/// Listing page with one anchor per href
pub fn listing_page(hrefs: &[&str]) -> String {
    let anchors: String = hrefs
        .iter()
        .map(|href| format!(r#"<a class="game-card" href="{href}">game</a>"#))
        .collect();

    format!("<html><body><main>{anchors}</main></body></html>")
}

/// Builder for detail pages in the target site's markup
pub struct DetailPage {
    name: String,
    provider: String,
    horizons: Vec<(String, String)>,
    info: Vec<(String, String)>,
}

impl DetailPage {
    pub fn new(name: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            horizons: Vec::new(),
            info: Vec::new(),
        }
    }

    /// Current RTP plus the 24h, weekly and monthly windows
    pub fn rtp(mut self, current: f64, daily: f64, weekly: f64, monthly: f64) -> Self {
        self.horizons = vec![
            ("Son 24 Saat".to_string(), format!("{daily}%")),
            ("Bu Hafta".to_string(), format!("{weekly}%")),
            ("Bu Ay".to_string(), format!("{monthly}%")),
        ];
        self.info("RTP", &format!("{current}%"))
    }

    pub fn theoretical(self, value: f64) -> Self {
        self.info("Teorik RTP", &format!("{value}%"))
    }

    pub fn info(mut self, label: &str, value: &str) -> Self {
        self.info.push((label.to_string(), value.to_string()));
        self
    }

    pub fn render(&self) -> String {
        let horizons: String = self
            .horizons
            .iter()
            .map(|(label, value)| {
                format!(
                    r#"<div><span data-translation="rtp.window">{label}</span><span class="font-medium">{value}</span></div>"#
                )
            })
            .collect();

        let info: String = self
            .info
            .iter()
            .map(|(label, value)| {
                format!(
                    r#"<div class="grid grid-flow-col"><p class="text-moon-16 text-trunks">{label}</p><p class="text-moon-16 text-bulma">{value}</p></div>"#
                )
            })
            .collect();

        format!(
            r#"<html><body>{header}<div class="grid grid-cols-3">{horizons}</div><section>{info}</section></body></html>"#,
            header = self.header(),
        )
    }

    /// Only the name and provider, none of the metric grids
    pub fn render_bare(&self) -> String {
        format!("<html><body>{}</body></html>", self.header())
    }

    fn header(&self) -> String {
        format!(
            r#"<header><h1 class="font-headline text-moon-18">{}</h1><p class="text-moon-10-caption">{}</p></header>"#,
            self.name, self.provider
        )
    }
}

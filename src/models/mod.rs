//! Data models for scraped RTP observations, stored games, change history and Discord payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A game as observed on a single detail page.
///
/// Produced by the extractor and never persisted directly; the change detector turns it into
/// a [`GameEntity`] upsert and, when metrics moved, a [`NewChangeRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub name: String,
    pub provider: String,
    pub category: String,
    pub theoretical_rtp: f64,
    pub current_rtp: f64,
    pub daily_rtp: f64,
    pub weekly_rtp: f64,
    pub monthly_rtp: f64,
    pub hit_ratio: f64,
    /// Empty when the page did not show a risk level
    pub risk_level: String,
    pub paylines: Option<u32>,
    pub min_bet: Option<f64>,
    pub max_bet: Option<f64>,
    pub source_url: String,
    pub observed_at: DateTime<Utc>,
}

/// A game provider. Looked up by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Storage identity of a game: the same name may exist under several providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GameIdentity {
    pub name: String,
    pub provider_id: i64,
}

/// A persisted game row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEntity {
    pub id: i64,
    pub provider_id: i64,
    pub name: String,
    pub slug: String,
    pub category: String,
    pub image: Option<String>,
    pub theoretical_rtp: f64,
    pub current_rtp: f64,
    pub daily_rtp: f64,
    pub weekly_rtp: f64,
    pub monthly_rtp: f64,
    pub hit_ratio: f64,
    pub risk_level: Option<String>,
    pub paylines: Option<u32>,
    pub min_bet: Option<f64>,
    pub max_bet: Option<f64>,
    pub is_trending: bool,
    pub is_popular: bool,
    pub is_hot: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A metric transition that has not been written yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChangeRecord {
    pub game_id: i64,
    pub old_rtp: f64,
    pub new_rtp: f64,
    pub old_daily_rtp: f64,
    pub new_daily_rtp: f64,
    pub old_weekly_rtp: f64,
    pub new_weekly_rtp: f64,
    pub old_monthly_rtp: f64,
    pub new_monthly_rtp: f64,
    /// Relative change of the current RTP, in percent of the old value
    pub change_percentage: f64,
    pub is_significant: bool,
    pub detected_at: DateTime<Utc>,
}

/// An append-only row of the change history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    #[serde(flatten)]
    pub change: NewChangeRecord,
}

/// A change that crossed the alerting threshold, ready for the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct SignificantChange {
    pub game: GameEntity,
    pub provider_name: String,
    pub change: ChangeRecord,
}

/// One failed unit of work in a crawl run: either a detail URL or a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlErrorEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub error: String,
}

impl CrawlErrorEntry {
    pub fn for_url(url: &str, error: impl ToString) -> Self {
        Self {
            url: Some(url.to_string()),
            page: None,
            error: error.to_string(),
        }
    }

    pub fn for_page(page: u32, error: impl ToString) -> Self {
        Self {
            url: None,
            page: Some(page),
            error: error.to_string(),
        }
    }
}

/// Result of one crawl invocation. Always produced, even when parts of the run failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub total_games_processed: usize,
    pub last_processed_page: u32,
    pub total_changes: usize,
    pub significant_changes: usize,
    pub errors: Vec<CrawlErrorEntry>,
}

/// Discord embed structure for rich notifications
#[derive(Debug, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<DiscordThumbnail>,
    pub fields: Vec<DiscordField>,
}

/// Small thumbnail image for Discord embeds
#[derive(Debug, Serialize)]
pub struct DiscordThumbnail {
    pub url: String,
}

/// Key-value field for Discord embeds
#[derive(Debug, Serialize)]
pub struct DiscordField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Discord webhook message payload
#[derive(Debug, Serialize)]
pub struct DiscordMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<DiscordEmbed>,
}

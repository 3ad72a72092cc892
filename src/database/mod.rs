use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::models::{
    ChangeRecord, GameEntity, GameIdentity, GameRecord, NewChangeRecord, Provider,
};
use crate::traits::GameStore;

const GAME_COLUMNS: &str = "id, provider_id, name, slug, category, image, theoretical_rtp, \
    current_rtp, daily_rtp, weekly_rtp, monthly_rtp, hit_ratio, risk_level, paylines, min_bet, \
    max_bet, is_trending, is_popular, is_hot, last_updated";

/// URL-safe slug: lowercase ASCII alphanumerics separated by single dashes.
///
/// Turkish and common Latin accented letters fold to their ASCII base letter.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        // combining marks, e.g. the dot left behind by lowercasing `İ`
        if ('\u{300}'..='\u{36f}').contains(&c) {
            continue;
        }

        let c = fold_to_ascii(c);
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c);
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }

    slug
}

fn fold_to_ascii(c: char) -> char {
    match c {
        'ç' | 'ć' | 'č' => 'c',
        'ğ' => 'g',
        'ı' | 'î' | 'ï' | 'í' | 'ì' => 'i',
        'ö' | 'ô' | 'ó' | 'ò' | 'õ' => 'o',
        'ş' | 'ś' | 'š' => 's',
        'ü' | 'û' | 'ú' | 'ù' => 'u',
        'â' | 'ä' | 'á' | 'à' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'ñ' => 'n',
        other => other,
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, PersistenceError> {
        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrated(pool).await
    }

    /// Private in-memory database on a single connection
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, PersistenceError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// First slug derived from `name` that no game uses yet: `name`, `name-1`, `name-2`, ...
    async fn free_slug(&self, name: &str) -> Result<String, PersistenceError> {
        let base = match slugify(name) {
            slug if slug.is_empty() => "game".to_string(),
            slug => slug,
        };

        let mut candidate = base.clone();
        let mut counter = 1;
        while self.slug_taken(&candidate).await? {
            candidate = format!("{base}-{counter}");
            counter += 1;
        }

        Ok(candidate)
    }

    async fn slug_taken(&self, slug: &str) -> Result<bool, PersistenceError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM games WHERE slug = ?) AS taken")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<bool, _>("taken"))
    }

    async fn game_by_id(&self, id: i64) -> Result<GameEntity, PersistenceError> {
        let row = sqlx::query(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(game_from_row(&row))
    }

    /// All change records of a game, oldest first
    #[cfg(test)]
    pub async fn change_history(&self, game_id: i64) -> Result<Vec<ChangeRecord>, PersistenceError> {
        let rows = sqlx::query(
            r"
            SELECT id, game_id, old_rtp, new_rtp, old_daily_rtp, new_daily_rtp, old_weekly_rtp,
                   new_weekly_rtp, old_monthly_rtp, new_monthly_rtp, change_percentage,
                   is_significant, detected_at
            FROM rtp_changes
            WHERE game_id = ?
            ORDER BY id
            ",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChangeRecord {
                id: row.get("id"),
                change: NewChangeRecord {
                    game_id: row.get("game_id"),
                    old_rtp: row.get("old_rtp"),
                    new_rtp: row.get("new_rtp"),
                    old_daily_rtp: row.get("old_daily_rtp"),
                    new_daily_rtp: row.get("new_daily_rtp"),
                    old_weekly_rtp: row.get("old_weekly_rtp"),
                    new_weekly_rtp: row.get("new_weekly_rtp"),
                    old_monthly_rtp: row.get("old_monthly_rtp"),
                    new_monthly_rtp: row.get("new_monthly_rtp"),
                    change_percentage: row.get("change_percentage"),
                    is_significant: row.get("is_significant"),
                    detected_at: row.get("detected_at"),
                },
            })
            .collect())
    }

    #[cfg(test)]
    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .unwrap()
            .get("n")
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn provider_from_row(row: &SqliteRow) -> Provider {
    Provider {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
    }
}

fn game_from_row(row: &SqliteRow) -> GameEntity {
    GameEntity {
        id: row.get("id"),
        provider_id: row.get("provider_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        category: row.get("category"),
        image: row.get("image"),
        theoretical_rtp: row.get("theoretical_rtp"),
        current_rtp: row.get("current_rtp"),
        daily_rtp: row.get("daily_rtp"),
        weekly_rtp: row.get("weekly_rtp"),
        monthly_rtp: row.get("monthly_rtp"),
        hit_ratio: row.get("hit_ratio"),
        risk_level: row.get("risk_level"),
        paylines: row
            .get::<Option<i64>, _>("paylines")
            .and_then(|n| u32::try_from(n).ok()),
        min_bet: row.get("min_bet"),
        max_bet: row.get("max_bet"),
        is_trending: row.get("is_trending"),
        is_popular: row.get("is_popular"),
        is_hot: row.get("is_hot"),
        last_updated: row.get::<Option<DateTime<Utc>>, _>("last_updated"),
    }
}

fn conflict_or(err: sqlx::Error, identity: &GameIdentity) -> PersistenceError {
    if PersistenceError::is_unique_violation(&err) {
        warn!(
            "Duplicate entry for game `{}` of provider {}",
            identity.name, identity.provider_id
        );
        PersistenceError::Conflict {
            name: identity.name.clone(),
            provider_id: identity.provider_id,
        }
    } else {
        err.into()
    }
}

#[async_trait]
impl GameStore for Database {
    async fn find_provider_by_name(&self, name: &str) -> Result<Option<Provider>, PersistenceError> {
        let row = sqlx::query("SELECT id, name, slug FROM providers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(provider_from_row))
    }

    async fn create_provider(&self, name: &str) -> Result<Provider, PersistenceError> {
        sqlx::query("INSERT INTO providers (name, slug) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(slugify(name))
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT id, name, slug FROM providers WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(provider_from_row(&row))
    }

    async fn find_game_by_identity(
        &self,
        identity: &GameIdentity,
    ) -> Result<Option<GameEntity>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE name = ? AND provider_id = ?"
        ))
        .bind(&identity.name)
        .bind(identity.provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(game_from_row))
    }

    async fn upsert_game(
        &self,
        identity: &GameIdentity,
        record: &GameRecord,
    ) -> Result<GameEntity, PersistenceError> {
        let risk_level = (!record.risk_level.is_empty()).then_some(record.risk_level.as_str());
        let paylines = record.paylines.map(i64::from);

        if let Some(existing) = self.find_game_by_identity(identity).await? {
            sqlx::query(
                r"
                UPDATE games
                SET category = ?, theoretical_rtp = ?, current_rtp = ?, daily_rtp = ?,
                    weekly_rtp = ?, monthly_rtp = ?, hit_ratio = ?, risk_level = ?, paylines = ?,
                    min_bet = ?, max_bet = ?, last_updated = ?, updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                ",
            )
            .bind(&record.category)
            .bind(record.theoretical_rtp)
            .bind(record.current_rtp)
            .bind(record.daily_rtp)
            .bind(record.weekly_rtp)
            .bind(record.monthly_rtp)
            .bind(record.hit_ratio)
            .bind(risk_level)
            .bind(paylines)
            .bind(record.min_bet)
            .bind(record.max_bet)
            .bind(record.observed_at)
            .bind(existing.id)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, identity))?;

            return self.game_by_id(existing.id).await;
        }

        let slug = self.free_slug(&identity.name).await?;

        let result = sqlx::query(
            r"
            INSERT INTO games (name, slug, provider_id, category, theoretical_rtp, current_rtp,
                               daily_rtp, weekly_rtp, monthly_rtp, hit_ratio, risk_level,
                               paylines, min_bet, max_bet, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&identity.name)
        .bind(&slug)
        .bind(identity.provider_id)
        .bind(&record.category)
        .bind(record.theoretical_rtp)
        .bind(record.current_rtp)
        .bind(record.daily_rtp)
        .bind(record.weekly_rtp)
        .bind(record.monthly_rtp)
        .bind(record.hit_ratio)
        .bind(risk_level)
        .bind(paylines)
        .bind(record.min_bet)
        .bind(record.max_bet)
        .bind(record.observed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, identity))?;

        info!("Created game `{}` with slug {}", identity.name, slug);
        self.game_by_id(result.last_insert_rowid()).await
    }

    async fn insert_change_record(
        &self,
        change: &NewChangeRecord,
    ) -> Result<ChangeRecord, PersistenceError> {
        let result = sqlx::query(
            r"
            INSERT INTO rtp_changes (game_id, old_rtp, new_rtp, old_daily_rtp, new_daily_rtp,
                                     old_weekly_rtp, new_weekly_rtp, old_monthly_rtp,
                                     new_monthly_rtp, change_percentage, is_significant,
                                     detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(change.game_id)
        .bind(change.old_rtp)
        .bind(change.new_rtp)
        .bind(change.old_daily_rtp)
        .bind(change.new_daily_rtp)
        .bind(change.old_weekly_rtp)
        .bind(change.new_weekly_rtp)
        .bind(change.old_monthly_rtp)
        .bind(change.new_monthly_rtp)
        .bind(change.change_percentage)
        .bind(change.is_significant)
        .bind(change.detected_at)
        .execute(&self.pool)
        .await?;

        Ok(ChangeRecord {
            id: result.last_insert_rowid(),
            change: change.clone(),
        })
    }
}

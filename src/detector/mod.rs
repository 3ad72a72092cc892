//! Change detection between a fresh observation and the stored snapshot of the same game.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::models::{
    ChangeRecord, GameEntity, GameIdentity, GameRecord, NewChangeRecord, SignificantChange,
};
use crate::traits::GameStore;

/// Smallest absolute move, in percentage points, that counts as a change
pub const NOISE_THRESHOLD: f64 = 0.01;
/// Smallest relative move of the current RTP, in percent, worth an alert
pub const SIGNIFICANCE_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    /// No stored snapshot yet
    FirstSighting,
    /// Every tracked metric stayed within the noise threshold
    Unchanged,
    Changed {
        change: NewChangeRecord,
        significant: bool,
    },
}

/// What happened to one observation once it reached storage
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub game: GameEntity,
    pub change: Option<ChangeRecord>,
    /// Set when the persisted change crossed the alerting threshold
    pub significant: Option<SignificantChange>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeDetector {
    pub noise_threshold: f64,
    pub significance_threshold: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            noise_threshold: NOISE_THRESHOLD,
            significance_threshold: SIGNIFICANCE_THRESHOLD,
        }
    }
}

impl ChangeDetector {
    fn moved(&self, old: f64, new: f64) -> bool {
        (new - old).abs() > self.noise_threshold
    }

    /// Compare `record` against the stored snapshot.
    ///
    /// Only the current RTP drives `change_percentage`; the daily, weekly and monthly windows
    /// decide whether a record is written at all.
    pub fn detect(
        &self,
        existing: Option<&GameEntity>,
        record: &GameRecord,
        detected_at: DateTime<Utc>,
    ) -> ChangeOutcome {
        let Some(game) = existing else {
            return ChangeOutcome::FirstSighting;
        };

        let current_moved = self.moved(game.current_rtp, record.current_rtp);
        let any_moved = current_moved
            || self.moved(game.daily_rtp, record.daily_rtp)
            || self.moved(game.weekly_rtp, record.weekly_rtp)
            || self.moved(game.monthly_rtp, record.monthly_rtp);

        if !any_moved {
            return ChangeOutcome::Unchanged;
        }

        let change_percentage = if current_moved && game.current_rtp != 0.0 {
            (record.current_rtp - game.current_rtp) / game.current_rtp * 100.0
        } else {
            0.0
        };
        let significant = change_percentage.abs() >= self.significance_threshold;

        ChangeOutcome::Changed {
            change: NewChangeRecord {
                game_id: game.id,
                old_rtp: game.current_rtp,
                new_rtp: record.current_rtp,
                old_daily_rtp: game.daily_rtp,
                new_daily_rtp: record.daily_rtp,
                old_weekly_rtp: game.weekly_rtp,
                new_weekly_rtp: record.weekly_rtp,
                old_monthly_rtp: game.monthly_rtp,
                new_monthly_rtp: record.monthly_rtp,
                change_percentage,
                is_significant: significant,
                detected_at,
            },
            significant,
        }
    }

    /// Run one observation through storage: resolve the provider, diff against the stored game,
    /// append the change record if any, then overwrite the snapshot with the new values.
    pub async fn observe(
        &self,
        store: &dyn GameStore,
        record: &GameRecord,
    ) -> Result<Observation, PersistenceError> {
        let provider = match store.find_provider_by_name(&record.provider).await? {
            Some(provider) => provider,
            None => store.create_provider(&record.provider).await?,
        };

        let identity = GameIdentity {
            name: record.name.clone(),
            provider_id: provider.id,
        };
        let existing = store.find_game_by_identity(&identity).await?;

        let outcome = self.detect(existing.as_ref(), record, record.observed_at);

        let change = match outcome {
            ChangeOutcome::FirstSighting => {
                info!("First sighting of {} ({})", record.name, provider.name);
                None
            }
            ChangeOutcome::Unchanged => {
                debug!("No RTP movement for {} ({})", record.name, provider.name);
                None
            }
            ChangeOutcome::Changed {
                change,
                significant,
            } => {
                info!(
                    "RTP change for {} ({}): {:.2}% -> {:.2}% ({:+.2}%){}",
                    record.name,
                    provider.name,
                    change.old_rtp,
                    change.new_rtp,
                    change.change_percentage,
                    if significant { " [significant]" } else { "" }
                );
                Some(store.insert_change_record(&change).await?)
            }
        };

        let game = store.upsert_game(&identity, record).await?;

        let significant = change
            .as_ref()
            .filter(|stored| stored.change.is_significant)
            .map(|stored| SignificantChange {
                game: game.clone(),
                provider_name: provider.name.clone(),
                change: stored.clone(),
            });

        Ok(Observation {
            game,
            change,
            significant,
        })
    }
}

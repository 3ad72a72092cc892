//! # Discord Webhook Integration
//!
//! Sends the significant RTP changes of a crawl run to a Discord channel as rich embeds.
//!
//! ## Embed Structure
//!
//! One embed per change:
//! - **Title**: game name
//! - **Description**: provider name
//! - **Color**: green when the RTP rose, red when it dropped
//! - **Thumbnail**: the game image, when it is an absolute URL
//! - **Fields**: old RTP, new RTP, relative change
//! - **Timestamp**: when the change was detected
//!
//! ## Rate Limits
//!
//! Discord accepts at most 10 embeds per message, so a run with many alerts is split into
//! several messages sent one after the other.
//!
//! ## Environment Configuration
//!
//! Set `DISCORD_WEBHOOK_URL` to enable delivery. Without it the notifier only logs.

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::models::{
    DiscordEmbed, DiscordField, DiscordMessage, DiscordThumbnail, SignificantChange,
};
use crate::traits::Notifier;

const MAX_EMBEDS_PER_MESSAGE: usize = 10;
const COLOR_RISE: u32 = 0x0057_F287;
const COLOR_DROP: u32 = 0x00ED_4245;

/// Discord webhook notification client for significant RTP changes.
///
/// Cloning is cheap: `reqwest::Client` shares its connection pool between clones.
#[derive(Clone)]
pub struct DiscordNotifier {
    client: Client,

    /// If `None`, notifications are skipped with a log line.
    webhook_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        if webhook_url.is_none() {
            warn!("DISCORD_WEBHOOK_URL not set - Discord notifications will be disabled");
        }

        Self {
            client: Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    /// Post every change, 10 embeds per message.
    ///
    /// ## Error Handling
    ///
    /// - **Missing webhook URL**: skipped with an info log
    /// - **Network failures and HTTP errors**: logged, the remaining messages are still sent,
    ///   then reported together as one error
    async fn notify(&self, changes: &[SignificantChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let Some(webhook_url) = &self.webhook_url else {
            info!(
                "Discord disabled, not sending {} significant changes",
                changes.len()
            );
            return Ok(());
        };

        let messages = build_messages(changes);
        let total = messages.len();
        let mut failures = 0;

        for message in messages {
            match self.client.post(webhook_url).json(&message).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        "Discord notification sent with {} changes",
                        message.embeds.len()
                    );
                }
                Ok(response) => {
                    error!("Failed to send Discord notification: {}", response.status());
                    failures += 1;
                }
                Err(e) => {
                    error!("Error sending Discord notification: {}", e);
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            bail!("{failures} of {total} Discord messages failed");
        }

        Ok(())
    }
}

/// Lay the changes out as webhook payloads, in detection order
pub fn build_messages(changes: &[SignificantChange]) -> Vec<DiscordMessage> {
    let total = changes.len();

    changes
        .chunks(MAX_EMBEDS_PER_MESSAGE)
        .enumerate()
        .map(|(index, chunk)| DiscordMessage {
            content: (index == 0).then(|| format!("🎰 {total} significant RTP changes detected")),
            embeds: chunk.iter().map(embed).collect(),
        })
        .collect()
}

fn embed(alert: &SignificantChange) -> DiscordEmbed {
    let change = &alert.change.change;
    let rose = change.new_rtp >= change.old_rtp;
    let arrow = if rose { "📈" } else { "📉" };

    DiscordEmbed {
        title: format!("{arrow} {}", alert.game.name),
        description: alert.provider_name.clone(),
        color: if rose { COLOR_RISE } else { COLOR_DROP },
        timestamp: change.detected_at.to_rfc3339(),
        thumbnail: alert
            .game
            .image
            .as_ref()
            .filter(|url| url.starts_with("http"))
            .map(|url| DiscordThumbnail { url: url.clone() }),
        fields: vec![
            DiscordField {
                name: "Old RTP".to_string(),
                value: format!("{:.2}%", change.old_rtp),
                inline: true,
            },
            DiscordField {
                name: "New RTP".to_string(),
                value: format!("{:.2}%", change.new_rtp),
                inline: true,
            },
            DiscordField {
                name: "Change".to_string(),
                value: format!("{:+.2}%", change.change_percentage),
                inline: true,
            },
        ],
    }
}

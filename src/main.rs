use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

mod config;
mod crawler;
mod database;
mod detector;
mod discord;
mod error;
mod extractor;
mod fetcher;
mod models;
mod rtp_monitor;
#[cfg(test)]
mod testing;
mod traits;

use config::Settings;
use models::CrawlSummary;
use rtp_monitor::RtpMonitor;

fn log_summary(summary: &CrawlSummary) {
    match serde_json::to_string(summary) {
        Ok(json) => info!("Crawl summary: {}", json),
        Err(e) => error!("Error serializing crawl summary: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting RTP monitor");

    let settings = Settings::from_env()?;
    let schedule = settings.schedule.clone();
    let monitor = RtpMonitor::new(settings).await?;

    // Run once immediately
    log_summary(&monitor.run_crawl().await);

    let Some(schedule) = schedule else {
        info!("No crawl schedule configured, exiting");
        return Ok(());
    };

    let sched = JobScheduler::new().await?;

    let job_monitor = monitor.clone();
    sched
        .add(Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let monitor = job_monitor.clone();
            Box::pin(async move {
                if let Some(summary) = monitor.run_exclusive().await {
                    log_summary(&summary);
                }
            })
        })?)
        .await?;

    info!("Scheduler started - crawling on '{}'", schedule);
    sched.start().await?;

    // Keep the program running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
    }
}

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use catalog_crawler::catalog_crawler::CatalogCrawler;
use catalog_crawler::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting catalog crawler");

    let config = AppConfig::from_env()?;
    let schedule = config.schedule.clone();
    let crawler = CatalogCrawler::new(config).await?;

    let Some(schedule) = schedule else {
        crawler.crawl().await?;
        return Ok(());
    };

    // Run once immediately, then on the schedule
    if let Err(e) = crawler.crawl().await {
        error!("Error during initial crawl: {:#}", e);
    }

    let mut sched = JobScheduler::new().await?;

    let job_crawler = crawler.clone();
    sched
        .add(Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let crawler = job_crawler.clone();
            Box::pin(async move {
                if let Err(e) = crawler.crawl().await {
                    error!("Error during scheduled crawl: {:#}", e);
                }
            })
        })?)
        .await?;

    info!("Scheduler started with schedule: {}", schedule);
    sched.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    sched.shutdown().await?;

    Ok(())
}

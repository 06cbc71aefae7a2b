use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog_pipeline::{CatalogPipeline, CategorySummary, PipelineSettings};
use crate::config::AppConfig;
use crate::database::Database;
use crate::models::CategorySpec;
use crate::scraper::HttpRenderer;
use crate::scrapers::CatalogAdapter;
use crate::traits::SiteAdapter;

/// Crawls every configured site into the product database
#[derive(Clone)]
pub struct CatalogCrawler {
    renderer: HttpRenderer,
    database: Database,
    adapters: Vec<Arc<CatalogAdapter>>,
    config: AppConfig,
}

impl CatalogCrawler {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let renderer = HttpRenderer::new(config.http.clone())?;
        let database = Database::new(&config.database_url).await?;
        let adapters = config
            .sites
            .iter()
            .map(|site| CatalogAdapter::for_site(*site).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            renderer,
            database,
            adapters,
            config,
        })
    }

    /// One full pass over every site and category
    pub async fn crawl(&self) -> Result<Vec<CategorySummary>> {
        let cancel = CancellationToken::new();
        let _stop = cancel.clone().drop_guard();
        if let Some(deadline) = self.config.run_deadline {
            spawn_deadline(&cancel, deadline);
        }

        let mut summaries = Vec::new();
        for adapter in &self.adapters {
            let categories = self.categories_for(adapter.as_ref());
            if categories.is_empty() {
                info!("No matching categories for {}", adapter.config().source);
                continue;
            }

            let pipeline = CatalogPipeline::with_cancellation(
                Arc::new(self.renderer.clone()),
                Arc::new(self.database.clone()),
                adapter.clone(),
                PipelineSettings {
                    detail_concurrency: self.config.detail_concurrency,
                    collector: self.config.collector.clone(),
                },
                cancel.clone(),
            )?;
            summaries.extend(pipeline.run(&categories).await?);
        }

        let persisted: usize = summaries.iter().map(|s| s.persisted).sum();
        let inserted: usize = summaries.iter().map(|s| s.inserted).sum();
        if inserted > 0 {
            info!("Found {} new products ({} persisted in total)", inserted, persisted);
        } else {
            info!("No new products found ({} persisted in total)", persisted);
        }

        Ok(summaries)
    }

    fn categories_for(&self, adapter: &dyn SiteAdapter) -> Vec<CategorySpec> {
        let categories = &adapter.config().categories;
        match &self.config.category_filter {
            Some(filter) => categories
                .iter()
                .filter(|category| filter.iter().any(|label| label == &category.label))
                .cloned()
                .collect(),
            None => categories.clone(),
        }
    }
}

/// Cancel the token once `deadline` has passed; the task ends early if the
/// token is cancelled first
fn spawn_deadline(cancel: &CancellationToken, deadline: Duration) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(deadline) => {
                warn!("Run deadline of {:?} reached, cancelling", deadline);
                cancel.cancel();
            }
        }
    });
}

//! Collect, fetch, normalize and persist one site's categories

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collector::PaginatedCollector;
use crate::config::CollectorSettings;
use crate::fetcher::{DetailFetcher, DetailOutcome};
use crate::models::{CategorySpec, SourceSite};
use crate::normalizer::FieldNormalizer;
use crate::traits::{PageRenderer, ProductStore, SiteAdapter, UpsertOutcome};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Detail pages fetched at once; 1 keeps fetches sequential
    pub detail_concurrency: usize,
    pub collector: CollectorSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detail_concurrency: 1,
            collector: CollectorSettings::default(),
        }
    }
}

/// Counters for one category run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub source: SourceSite,
    pub category: String,
    /// References yielded by the listing traversal
    pub discovered: usize,
    /// References whose detail page produced records
    pub fetched: usize,
    pub normalized: usize,
    pub persisted: usize,
    /// Skipped references plus rejected records
    pub skipped: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub skip_reasons: BTreeMap<&'static str, usize>,
}

impl CategorySummary {
    pub fn new(source: SourceSite, category: impl Into<String>) -> Self {
        Self {
            source,
            category: category.into(),
            discovered: 0,
            fetched: 0,
            normalized: 0,
            persisted: 0,
            skipped: 0,
            inserted: 0,
            replaced: 0,
            unchanged: 0,
            skip_reasons: BTreeMap::new(),
        }
    }

    fn skip(&mut self, reason: &'static str) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_default() += 1;
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        self.persisted += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Replaced => self.replaced += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

impl fmt::Display for CategorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: discovered={} fetched={} normalized={} persisted={} (new={} updated={} unchanged={}) skipped={}",
            self.source,
            self.category,
            self.discovered,
            self.fetched,
            self.normalized,
            self.persisted,
            self.inserted,
            self.replaced,
            self.unchanged,
            self.skipped
        )?;
        for (reason, count) in &self.skip_reasons {
            write!(f, " {reason}={count}")?;
        }
        Ok(())
    }
}

/// End-to-end crawl for a single site
pub struct CatalogPipeline {
    source: SourceSite,
    collector: PaginatedCollector,
    fetcher: DetailFetcher,
    normalizer: FieldNormalizer,
    store: Arc<dyn ProductStore>,
    detail_concurrency: usize,
    cancel: CancellationToken,
}

impl CatalogPipeline {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn ProductStore>,
        adapter: Arc<dyn SiteAdapter>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        Self::with_cancellation(renderer, store, adapter, settings, CancellationToken::new())
    }

    /// Build a pipeline that stops when `cancel` fires
    pub fn with_cancellation(
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn ProductStore>,
        adapter: Arc<dyn SiteAdapter>,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let normalizer = FieldNormalizer::for_site(adapter.config())?;

        Ok(Self {
            source: adapter.config().source,
            collector: PaginatedCollector::new(
                renderer.clone(),
                adapter.clone(),
                settings.collector,
                cancel.clone(),
            ),
            fetcher: DetailFetcher::new(renderer, adapter, cancel.clone()),
            normalizer,
            store,
            detail_concurrency: settings.detail_concurrency.max(1),
            cancel,
        })
    }

    /// Run every category in order, stopping early on cancellation
    ///
    /// # Errors
    /// Fails only when the store does; per-product problems are counted.
    pub async fn run(&self, categories: &[CategorySpec]) -> Result<Vec<CategorySummary>> {
        let mut summaries = Vec::with_capacity(categories.len());

        for category in categories {
            if self.cancel.is_cancelled() {
                info!("Run on {} cancelled before category: {}", self.source, category.label);
                break;
            }
            summaries.push(self.run_category(category).await?);
        }

        let persisted: usize = summaries.iter().map(|s| s.persisted).sum();
        let skipped: usize = summaries.iter().map(|s| s.skipped).sum();
        info!(
            "Finished {}: {} categories, {} products persisted, {} skipped",
            self.source,
            summaries.len(),
            persisted,
            skipped
        );

        Ok(summaries)
    }

    pub async fn run_category(&self, category: &CategorySpec) -> Result<CategorySummary> {
        info!("Crawling category: {} on {}", category.label, self.source);
        let mut summary = CategorySummary::new(self.source, &category.label);

        let fetches = self
            .collector
            .collect(category)
            .map(|reference| async move {
                let outcome = self.fetcher.fetch(&reference).await;
                (reference, outcome)
            })
            .buffer_unordered(self.detail_concurrency);
        futures::pin_mut!(fetches);

        while let Some((reference, outcome)) = fetches.next().await {
            summary.discovered += 1;

            let records = match outcome {
                DetailOutcome::Fetched(records) => records,
                DetailOutcome::Skipped(reason) => {
                    summary.skip(reason.label());
                    continue;
                }
            };
            summary.fetched += 1;

            for raw in records {
                let record = match self.normalizer.normalize(raw) {
                    Ok(record) => record,
                    Err(rejection) => {
                        warn!("Rejected record from {}: {}", reference.url, rejection);
                        summary.skip(rejection.label());
                        continue;
                    }
                };
                summary.normalized += 1;

                let outcome = self.store.upsert(&record).await.with_context(|| {
                    format!("Failed to persist {} from {}", record.foreign_id, reference.url)
                })?;
                if outcome == UpsertOutcome::Inserted {
                    info!("New product found: {} - {} ({})", record.brand, record.name, record.price);
                }
                summary.record(outcome);
            }
        }

        info!("{}", summary);
        Ok(summary)
    }
}

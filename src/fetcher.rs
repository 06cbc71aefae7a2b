use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SkipReason;
use crate::models::{ProductReference, RawProductRecord};
use crate::traits::{PageRenderer, SiteAdapter};

/// Result of fetching one product reference
#[derive(Debug, Clone, PartialEq)]
pub enum DetailOutcome {
    /// One raw record per purchasable variant
    Fetched(Vec<RawProductRecord>),
    Skipped(SkipReason),
}

/// Renders detail pages and hands them to the site adapter
pub struct DetailFetcher {
    renderer: Arc<dyn PageRenderer>,
    adapter: Arc<dyn SiteAdapter>,
    cancel: CancellationToken,
}

impl DetailFetcher {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        adapter: Arc<dyn SiteAdapter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            renderer,
            adapter,
            cancel,
        }
    }

    /// Fetch and extract a product. Never fails; problems become skips.
    pub async fn fetch(&self, reference: &ProductReference) -> DetailOutcome {
        let wait = self.adapter.config().detail_wait;
        let document = match self.renderer.render(&reference.url, wait, &self.cancel).await {
            Ok(document) => document,
            Err(e) => {
                warn!("Skipping {}: {}", reference.url, e);
                return DetailOutcome::Skipped(e.into());
            }
        };

        match self.adapter.extract_product(reference, &document) {
            Ok(records) if records.is_empty() => {
                debug!("No product records on {}", reference.url);
                DetailOutcome::Skipped(SkipReason::NoProductData)
            }
            Ok(records) => DetailOutcome::Fetched(records),
            Err(reason) => {
                warn!("Skipping {}: {}", reference.url, reason);
                DetailOutcome::Skipped(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::scrapers::CatalogAdapter;
    use crate::testing::{ScriptedRenderer, product_page, product_url, test_site};

    fn reference(slug: &str) -> ProductReference {
        ProductReference {
            url: product_url(slug),
            category: "serums".to_string(),
            page: 1,
        }
    }

    fn fetcher(renderer: ScriptedRenderer) -> DetailFetcher {
        DetailFetcher::new(
            Arc::new(renderer),
            Arc::new(CatalogAdapter::new(test_site()).unwrap()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn extracts_records_from_detail_page() {
        let fetcher = fetcher(
            ScriptedRenderer::new().page(product_url("glow"), product_page("Glow Serum", "Acme", "24.00")),
        );

        let DetailOutcome::Fetched(records) = fetcher.fetch(&reference("glow")).await else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].foreign_id.as_deref(), Some("glow"));
        assert_eq!(records[0].name.as_deref(), Some("Glow Serum"));
        assert_eq!(records[0].brand.as_deref(), Some("Acme"));
        assert_eq!(records[0].category, "serums");
    }

    #[tokio::test]
    async fn fetch_failures_become_skips() {
        let fetcher = fetcher(ScriptedRenderer::new().failing(product_url("gone"), 500));

        assert_eq!(
            fetcher.fetch(&reference("gone")).await,
            DetailOutcome::Skipped(SkipReason::Fetch(FetchError::Status {
                url: product_url("gone"),
                status: 500,
            }))
        );
    }

    #[tokio::test]
    async fn missing_name_is_skipped() {
        let body = product_page("Glow Serum", "Acme", "24.00").replace(r#""name":"Glow Serum","#, "");
        let fetcher = fetcher(ScriptedRenderer::new().page(product_url("glow"), body));

        assert_eq!(
            fetcher.fetch(&reference("glow")).await,
            DetailOutcome::Skipped(SkipReason::MissingField("name"))
        );
    }
}

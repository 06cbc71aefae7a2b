//! Traits and interfaces for site-agnostic catalog crawling

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, SkipReason};
use crate::models::{
    CategorySpec, PageCursor, PaginationScheme, PriceEncoding, ProductIdentity, ProductRecord,
    ProductReference, RatingScale, RawProductRecord, SourceSite,
};

/// How long a renderer should let a page settle before reading it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Read the response as soon as it arrives
    Immediate,
    /// Let scripts run for `wait`, scrolling `scroll_steps` times
    Settle { wait: Duration, scroll_steps: u32 },
}

/// A fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Final URL after redirects
    pub url: String,
    pub body: String,
}

/// Configuration for a site adapter
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub source: SourceSite,
    /// Base URL used to resolve relative links
    pub base_url: String,
    /// Listing URL pattern with `{category}`, `{id}`, `{page}` and `{offset}` placeholders
    pub listing_url_pattern: String,
    pub pagination: PaginationScheme,
    /// Items per listing page, when the site uses a fixed size
    pub page_size: Option<u32>,
    /// CSS selectors for extracting data
    pub selectors: SiteSelectors,
    /// Regex with one capture group pulling the product id out of a detail URL
    pub foreign_id_pattern: Option<String>,
    /// Encoding of per-variant prices in embedded variant blocks
    pub variant_price_encoding: PriceEncoding,
    pub default_currency: String,
    pub listing_wait: WaitPolicy,
    pub detail_wait: WaitPolicy,
    /// Hub page step for sites whose categories only list sub-categories
    pub subcategories: Option<SubcategoryDiscovery>,
    /// Categories crawled when no filter is configured
    pub categories: Vec<CategorySpec>,
}

/// Where a category's sub-listings are linked from and how to read their ids
#[derive(Debug, Clone)]
pub struct SubcategoryDiscovery {
    /// Hub page pattern, with the same placeholders as the listing pattern
    pub url_pattern: String,
    /// Links to sub-listings on the hub page
    pub link: String,
    /// Regex with one capture group pulling the numeric sub-listing id out of a link
    pub id_pattern: String,
}

/// CSS selectors for the parts of a site the generic extractors can't infer
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    /// Product detail links on a listing page
    pub product_link: String,
    /// Element whose text carries the total product count ("412 products")
    pub total_count: Option<String>,
    /// Enabled "next page" control; its absence ends the traversal
    pub next_control: Option<String>,
    /// Brand override on detail pages
    pub brand: Option<FieldSelector>,
    /// Rating override on detail pages
    pub rating: Option<RatingSelector>,
    /// Ingredient text block on detail pages
    pub ingredients: Option<FieldSelector>,
}

/// A selector plus the attribute to read; element text when `attr` is `None`
#[derive(Debug, Clone)]
pub struct FieldSelector {
    pub css: String,
    pub attr: Option<String>,
}

impl FieldSelector {
    pub fn text(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            attr: None,
        }
    }

    pub fn attr(css: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            attr: Some(attr.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RatingSelector {
    pub field: FieldSelector,
    pub scale: RatingScale,
}

/// What a listing page yielded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Absolute product URLs in page order
    pub references: Vec<String>,
    /// Total product count for the category, when the page states it
    pub total_count: Option<usize>,
    /// Whether a next-page control is present; `None` when the site has none to check
    pub has_next: Option<bool>,
}

/// Fetch capability: turns a URL into a document
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        wait: WaitPolicy,
        cancel: &CancellationToken,
    ) -> Result<Document, FetchError>;
}

/// Per-site extraction adapter
pub trait SiteAdapter: Send + Sync {
    /// Get the configuration for this adapter
    fn config(&self) -> &SiteConfig;

    /// Extract product links and pagination hints from a listing page
    fn parse_listing(&self, document: &Document) -> ListingPage;

    /// Extract one raw record per purchasable variant from a detail page
    ///
    /// # Errors
    /// Returns a [`SkipReason`] when an identity-bearing field is missing.
    fn extract_product(
        &self,
        reference: &ProductReference,
        document: &Document,
    ) -> Result<Vec<RawProductRecord>, SkipReason>;

    /// Sub-listings linked from a category's hub page
    ///
    /// Each keeps the parent's label and carries its own site id. Adapters
    /// without a hub step return nothing.
    fn parse_subcategories(&self, _category: &CategorySpec, _document: &Document) -> Vec<CategorySpec> {
        Vec::new()
    }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::first(self.config().pagination)
    }

    /// Build the listing URL for a category at the given cursor
    fn listing_url(&self, category: &CategorySpec, cursor: &PageCursor) -> String {
        let (page, offset) = match *cursor {
            PageCursor::Page { number } => (number, 0),
            PageCursor::Offset { start, .. } => (cursor.ordinal(), start),
        };
        fill_pattern(&self.config().listing_url_pattern, self.config(), category, page, offset)
    }

    /// Hub page of a category, for sites configured with a sub-category step
    fn subcategory_url(&self, category: &CategorySpec) -> Option<String> {
        let discovery = self.config().subcategories.as_ref()?;
        Some(fill_pattern(&discovery.url_pattern, self.config(), category, 1, 0))
    }
}

fn fill_pattern(pattern: &str, config: &SiteConfig, category: &CategorySpec, page: u32, offset: u32) -> String {
    let id = category.site_id.map(|id| id.to_string()).unwrap_or_default();

    pattern
        .replace("{base}", config.base_url.trim_end_matches('/'))
        .replace("{category}", &urlencoding::encode(&category.label))
        .replace("{id}", &id)
        .replace("{page}", &page.to_string())
        .replace("{offset}", &offset.to_string())
}

/// Result of committing a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Identity existed with identical content; only the scrape time moved
    Unchanged,
}

/// Filter for scanning persisted products
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub source: Option<SourceSite>,
    pub category: Option<String>,
}

/// Persistence capability keyed by [`ProductIdentity`]
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert the record or replace the one sharing its identity
    async fn upsert(&self, record: &ProductRecord) -> Result<UpsertOutcome>;

    async fn find(&self, identity: &ProductIdentity) -> Result<Option<ProductRecord>>;

    /// Records matching the filter in insertion order
    async fn scan(&self, filter: &ProductFilter) -> Result<Vec<ProductRecord>>;
}

//! Category traversal across listing pages

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::Stream;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CollectorSettings;
use crate::models::{CategorySpec, PageCursor, ProductReference};
use crate::traits::{PageRenderer, SiteAdapter};

/// Walks a category's listing pages and yields product references lazily
pub struct PaginatedCollector {
    renderer: Arc<dyn PageRenderer>,
    adapter: Arc<dyn SiteAdapter>,
    settings: CollectorSettings,
    cancel: CancellationToken,
}

/// State of one traversal; dropped when the stream ends
struct Traversal {
    /// Category the caller asked for; its label tags every reference
    category: CategorySpec,
    expanded: bool,
    /// Listings still to walk after the current one
    listings: VecDeque<CategorySpec>,
    /// Listing being paginated: the category itself or one of its sub-listings
    listing: CategorySpec,
    cursor: PageCursor,
    pages_fetched: u32,
    seen: HashSet<String>,
    queued: VecDeque<ProductReference>,
    last_url: Option<String>,
    finished: bool,
}

impl Traversal {
    fn start(&mut self, listing: CategorySpec, cursor: PageCursor) {
        self.listing = listing;
        self.cursor = cursor;
        self.pages_fetched = 0;
        self.last_url = None;
        self.finished = false;
    }
}

impl PaginatedCollector {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        adapter: Arc<dyn SiteAdapter>,
        settings: CollectorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            renderer,
            adapter,
            settings,
            cancel,
        }
    }

    /// Stream the product references of a category.
    ///
    /// Every call starts a fresh traversal from the site's first page. Sites
    /// with a hub step first expand the category into its sub-listings and
    /// walk them one after another. The next page is only requested once the
    /// current page's references have been consumed and its termination
    /// checks have passed.
    pub fn collect(&self, category: &CategorySpec) -> impl Stream<Item = ProductReference> + Send + '_ {
        let traversal = Traversal {
            category: category.clone(),
            expanded: false,
            listings: VecDeque::new(),
            listing: category.clone(),
            cursor: self.adapter.first_cursor(),
            pages_fetched: 0,
            seen: HashSet::new(),
            queued: VecDeque::new(),
            last_url: None,
            finished: true,
        };

        stream::unfold(traversal, move |mut traversal| async move {
            loop {
                if self.cancel.is_cancelled() {
                    return None;
                }
                if let Some(reference) = traversal.queued.pop_front() {
                    return Some((reference, traversal));
                }
                if !traversal.finished {
                    self.next_page(&mut traversal).await;
                } else if !traversal.expanded {
                    self.expand(&mut traversal).await;
                } else if let Some(listing) = traversal.listings.pop_front() {
                    traversal.start(listing, self.adapter.first_cursor());
                } else {
                    return None;
                }
            }
        })
    }

    /// Queue the listings to walk for the requested category
    async fn expand(&self, traversal: &mut Traversal) {
        traversal.expanded = true;
        let Some(url) = self.adapter.subcategory_url(&traversal.category) else {
            traversal.listings.push_back(traversal.category.clone());
            return;
        };

        let site = self.adapter.config().source;
        let label = &traversal.category.label;
        info!("Discovering sub-categories of {} on {}", label, site);

        let subcategories = match self
            .renderer
            .render(&url, self.adapter.config().listing_wait, &self.cancel)
            .await
        {
            Ok(document) => self.adapter.parse_subcategories(&traversal.category, &document),
            Err(e) => {
                warn!("Sub-category page of {} on {} failed: {}", label, site, e);
                Vec::new()
            }
        };

        if subcategories.is_empty() {
            info!("No sub-categories for {} on {}, crawling its own listing", label, site);
            traversal.listings.push_back(traversal.category.clone());
        } else {
            info!("Found {} sub-categories for {} on {}", subcategories.len(), label, site);
            traversal.listings.extend(subcategories);
        }
    }

    async fn next_page(&self, traversal: &mut Traversal) {
        let site = self.adapter.config().source;
        let label = traversal.category.label.clone();

        if self.cancel.is_cancelled() {
            info!("Traversal of {} on {} cancelled", label, site);
            traversal.finished = true;
            return;
        }

        if traversal.pages_fetched >= self.settings.max_pages {
            info!(
                "Reached maximum page limit ({}) for category: {} on {}",
                self.settings.max_pages, label, site
            );
            traversal.finished = true;
            return;
        }

        if traversal.pages_fetched > 0 && !self.settings.page_delay.is_zero() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    traversal.finished = true;
                    return;
                }
                () = tokio::time::sleep(self.settings.page_delay) => {}
            }
        }

        let url = self.adapter.listing_url(&traversal.listing, &traversal.cursor);
        if traversal.last_url.as_deref() == Some(url.as_str()) {
            info!(
                "Next page URL is the same as current URL, stopping pagination for: {} on {}",
                label, site
            );
            traversal.finished = true;
            return;
        }

        let page = traversal.cursor.ordinal();
        info!("Fetching page {} for category: {} on {}", page, label, site);

        let document = match self
            .renderer
            .render(&url, self.adapter.config().listing_wait, &self.cancel)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                warn!("Page {} of {} on {} failed, ending traversal: {}", page, label, site, e);
                traversal.finished = true;
                return;
            }
        };
        traversal.pages_fetched += 1;
        traversal.last_url = Some(url);

        let listing = self.adapter.parse_listing(&document);
        if listing.references.is_empty() {
            info!(
                "No more products found for category: {} on {} (searched {} pages)",
                label, site, traversal.pages_fetched
            );
            traversal.finished = true;
            return;
        }

        let before = traversal.seen.len();
        for url in listing.references {
            if traversal.seen.insert(url.clone()) {
                traversal.queued.push_back(ProductReference {
                    url,
                    category: label.clone(),
                    page,
                });
            }
        }
        let added = traversal.seen.len() - before;
        debug!("Page {} of {} added {} new references", page, label, added);

        if added == 0 {
            info!("Page {} of {} only repeated earlier products, stopping", page, label);
            traversal.finished = true;
            return;
        }

        if let Some(total) = listing.total_count {
            let consumed = self.adapter.config().page_size.map_or(traversal.seen.len(), |size| {
                traversal.seen.len().max(traversal.pages_fetched as usize * size as usize)
            });
            if consumed >= total {
                info!("Reached all {} products of {} on {}", total, label, site);
                traversal.finished = true;
                return;
            }
        }

        if listing.has_next == Some(false) {
            info!("No next page control for {} on {} after page {}", label, site, page);
            traversal.finished = true;
            return;
        }

        traversal.cursor.advance();
    }
}

//! In-process fakes shared by the unit tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::models::{CategorySpec, PaginationScheme, PriceEncoding, SourceSite};
use crate::traits::{Document, FieldSelector, PageRenderer, SiteConfig, SiteSelectors, WaitPolicy};

pub const BASE: &str = "https://shop.test";

/// Serves canned bodies by URL and records every request
#[derive(Default)]
pub struct ScriptedRenderer {
    pages: HashMap<String, Result<String, u16>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), Ok(body.into()));
        self
    }

    pub fn failing(mut self, url: impl Into<String>, status: u16) -> Self {
        self.pages.insert(url.into(), Err(status));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(
        &self,
        url: &str,
        _wait: WaitPolicy,
        cancel: &CancellationToken,
    ) -> Result<Document, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                url: url.to_string(),
            });
        }
        match self.pages.get(url) {
            Some(Ok(body)) => Ok(Document {
                url: url.to_string(),
                body: body.clone(),
            }),
            Some(Err(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// A small page-numbered shop with plain product links
pub fn test_site() -> SiteConfig {
    SiteConfig {
        source: SourceSite::DetoxMarket,
        base_url: BASE.to_string(),
        listing_url_pattern: "{base}/c/{category}?page={page}".to_string(),
        pagination: PaginationScheme::PageNumber { first: 1 },
        page_size: None,
        selectors: SiteSelectors {
            product_link: "a.product".to_string(),
            total_count: Some(".count".to_string()),
            next_control: None,
            brand: None,
            rating: None,
            ingredients: Some(FieldSelector::text(".ingredients")),
        },
        foreign_id_pattern: Some(r"/p/([^/?]+)".to_string()),
        variant_price_encoding: PriceEncoding::MinorUnits,
        default_currency: "USD".to_string(),
        listing_wait: WaitPolicy::Immediate,
        detail_wait: WaitPolicy::Immediate,
        subcategories: None,
        categories: vec![CategorySpec::new("serums")],
    }
}

pub fn listing_url(category: &str, page: u32) -> String {
    format!("{BASE}/c/{category}?page={page}")
}

pub fn listing_page(slugs: &[&str]) -> String {
    let links: String = slugs
        .iter()
        .map(|slug| format!(r#"<a class="product" href="/p/{slug}">{slug}</a>"#))
        .collect();
    format!("<html><body>{links}</body></html>")
}

pub fn product_url(slug: &str) -> String {
    format!("{BASE}/p/{slug}")
}

pub fn product_page(name: &str, brand: &str, price: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@context":"https://schema.org","@type":"Product","name":"{name}",
          "brand":{{"@type":"Brand","name":"{brand}"}},
          "offers":{{"@type":"Offer","price":"{price}","priceCurrency":"USD"}}}}
        </script></head><body><div class="ingredients">Water, Glycerin*, Fragrance.</div></body></html>"#
    )
}

//! Data models for catalog products, categories and pagination state

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retail site a product was scraped from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceSite {
    Sephora,
    Walgreens,
    DetoxMarket,
}

impl SourceSite {
    pub const ALL: [Self; 3] = [Self::Sephora, Self::Walgreens, Self::DetoxMarket];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sephora => "sephora",
            Self::Walgreens => "walgreens",
            Self::DetoxMarket => "detox-market",
        }
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSite {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sephora" => Ok(Self::Sephora),
            "walgreens" => Ok(Self::Walgreens),
            "detox-market" | "detox_market" | "detox" => Ok(Self::DetoxMarket),
            other => Err(anyhow::anyhow!("unknown source site: {other}")),
        }
    }
}

/// A category to crawl: the site's label plus its internal numeric id, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySpec {
    pub label: String,
    pub site_id: Option<u64>,
}

impl CategorySpec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            site_id: None,
        }
    }

    pub fn with_id(label: impl Into<String>, site_id: u64) -> Self {
        Self {
            label: label.into(),
            site_id: Some(site_id),
        }
    }
}

/// How a site numbers its listing pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationScheme {
    /// `?page=N` style, starting at `first`
    PageNumber { first: u32 },
    /// `?offset=N` style, starting at zero and advancing by `step` items
    Offset { step: u32 },
}

/// Position within one category traversal.
///
/// A cursor is created fresh for every traversal and dropped when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    Page { number: u32 },
    Offset { start: u32, step: u32 },
}

impl PageCursor {
    pub const fn first(scheme: PaginationScheme) -> Self {
        match scheme {
            PaginationScheme::PageNumber { first } => Self::Page { number: first },
            PaginationScheme::Offset { step } => Self::Offset { start: 0, step },
        }
    }

    pub fn advance(&mut self) {
        match self {
            Self::Page { number } => *number += 1,
            Self::Offset { start, step } => *start += *step,
        }
    }

    /// One-based ordinal of the page this cursor points at, for logging.
    pub const fn ordinal(&self) -> u32 {
        match *self {
            Self::Page { number } => number,
            Self::Offset { start, step } => {
                if step == 0 {
                    1
                } else {
                    start / step + 1
                }
            }
        }
    }
}

/// A product link discovered on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReference {
    /// Absolute detail page URL
    pub url: String,
    /// Category label the link was found under
    pub category: String,
    /// Listing page ordinal the link was found on
    pub page: u32,
}

/// Scale a raw rating string is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatingScale {
    /// Already 0-5 stars
    #[default]
    FiveStar,
    /// Percentage of the star bar filled, 0-100
    Percent,
}

/// How a raw price string encodes its amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceEncoding {
    /// Human-formatted major units, e.g. `$12.99`
    #[default]
    Decimal,
    /// Integer minor units (cents), e.g. `1299`
    MinorUnits,
}

/// Unvalidated product fields as extracted from a detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProductRecord {
    pub category: String,
    pub foreign_id: Option<String>,
    pub variant_id: Option<String>,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub price_text: Option<String>,
    pub price_encoding: PriceEncoding,
    pub currency: Option<String>,
    pub rating_text: Option<String>,
    pub rating_scale: RatingScale,
    pub size_text: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub ingredients_text: Option<String>,
    pub url: String,
}

/// Exact price held in minor units of its currency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub minor_units: i64,
    pub currency: String,
}

impl Price {
    pub fn new(minor_units: i64, currency: impl Into<String>) -> Self {
        Self {
            minor_units,
            currency: currency.into(),
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

/// Stable identity of a persisted product
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductIdentity {
    pub source: SourceSite,
    pub category: String,
    pub foreign_id: String,
    pub variant_id: Option<String>,
}

/// A validated, normalized product ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source: SourceSite,
    pub category: String,
    pub foreign_id: String,
    pub variant_id: Option<String>,
    pub brand: String,
    pub name: String,
    pub price: Price,
    pub rating: Option<f32>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub ingredients: Vec<String>,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
}

impl ProductRecord {
    pub fn identity(&self) -> ProductIdentity {
        ProductIdentity {
            source: self.source,
            category: self.category.clone(),
            foreign_id: self.foreign_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    /// Hash of every user-visible field, excluding timestamps.
    pub fn content_hash(&self) -> String {
        let content = serde_json::json!({
            "brand": self.brand,
            "name": self.name,
            "price": self.price,
            "rating": self.rating,
            "size": self.size,
            "description": self.description,
            "images": self.images,
            "ingredients": self.ingredients,
            "url": self.url,
        });
        format!("{:x}", md5::compute(content.to_string()))
    }
}

//! Selector-driven site adapter shared by every catalog
//!
//! Listing pages are read with the site's configured link, total-count and
//! next-page selectors. Detail pages are read from embedded structured data
//! (JSON-LD, OpenGraph, Shopify variant blocks) plus a few per-site
//! overrides for fields that structured data does not carry, such as the
//! ingredient list.

pub mod sites;
pub mod structured;

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::SkipReason;
use crate::models::{
    CategorySpec, PriceEncoding, ProductReference, RatingScale, RawProductRecord, SourceSite,
};
use crate::normalizer::parse_size;
use crate::traits::{Document, FieldSelector, ListingPage, SiteAdapter, SiteConfig};

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s+(?:products|results|items)").expect("valid total regex")
});

/// A parsed selector plus the attribute to read from the first match
struct CompiledField {
    selector: Selector,
    attr: Option<String>,
}

impl CompiledField {
    fn compile(field: &FieldSelector, what: &str) -> Result<Self> {
        let selector = Selector::parse(&field.css)
            .map_err(|e| anyhow::anyhow!("Failed to parse {what} selector: {:?}", e))?;
        Ok(Self {
            selector,
            attr: field.attr.clone(),
        })
    }

    fn value(&self, document: &Html) -> Option<String> {
        let element = document.select(&self.selector).next()?;
        let value = match &self.attr {
            Some(attr) => element.value().attr(attr)?.to_string(),
            None => element_text(element),
        };
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Adapter for one catalog, driven entirely by its [`SiteConfig`]
pub struct CatalogAdapter {
    config: SiteConfig,
    product_link: Selector,
    total_count: Option<Selector>,
    next_control: Option<Selector>,
    brand: Option<CompiledField>,
    rating: Option<(CompiledField, RatingScale)>,
    ingredients: Option<CompiledField>,
    foreign_id_pattern: Option<Regex>,
    subcategory_link: Option<(Selector, Regex)>,
}

impl CatalogAdapter {
    /// Compile the selectors and patterns of a site configuration
    pub fn new(config: SiteConfig) -> Result<Self> {
        let selectors = &config.selectors;

        let product_link = Selector::parse(&selectors.product_link)
            .map_err(|e| anyhow::anyhow!("Failed to parse product link selector: {:?}", e))?;
        let total_count = selectors
            .total_count
            .as_ref()
            .map(|s| Selector::parse(s))
            .transpose()
            .map_err(|e| anyhow::anyhow!("Failed to parse total count selector: {:?}", e))?;
        let next_control = selectors
            .next_control
            .as_ref()
            .map(|s| Selector::parse(s))
            .transpose()
            .map_err(|e| anyhow::anyhow!("Failed to parse next page selector: {:?}", e))?;

        let brand = selectors
            .brand
            .as_ref()
            .map(|f| CompiledField::compile(f, "brand"))
            .transpose()?;
        let rating = selectors
            .rating
            .as_ref()
            .map(|r| CompiledField::compile(&r.field, "rating").map(|field| (field, r.scale)))
            .transpose()?;
        let ingredients = selectors
            .ingredients
            .as_ref()
            .map(|f| CompiledField::compile(f, "ingredients"))
            .transpose()?;

        let foreign_id_pattern = config
            .foreign_id_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;

        let subcategory_link = config
            .subcategories
            .as_ref()
            .map(|discovery| -> Result<(Selector, Regex)> {
                let selector = Selector::parse(&discovery.link)
                    .map_err(|e| anyhow::anyhow!("Failed to parse sub-category link selector: {:?}", e))?;
                Ok((selector, Regex::new(&discovery.id_pattern)?))
            })
            .transpose()?;

        Ok(Self {
            config,
            product_link,
            total_count,
            next_control,
            brand,
            rating,
            ingredients,
            foreign_id_pattern,
            subcategory_link,
        })
    }

    /// Adapter with the built-in preset for a site
    pub fn for_site(site: SourceSite) -> Result<Self> {
        Self::new(sites::preset(site))
    }

    fn foreign_id_from_url(&self, url: &str) -> Option<String> {
        let captures = self.foreign_id_pattern.as_ref()?.captures(url)?;
        Some(captures.get(1)?.as_str().to_string())
    }

    /// Resolve a listing link, dropping query and fragment so repeat links collapse
    fn resolve_link(base: Option<&Url>, href: &str) -> Option<String> {
        let mut url = match base {
            Some(base) => base.join(href).ok()?,
            None => Url::parse(href).ok()?,
        };
        url.set_query(None);
        url.set_fragment(None);
        Some(url.into())
    }
}

fn parse_total(text: &str) -> Option<usize> {
    let captures = TOTAL_RE.captures(text)?;
    captures[1].replace(',', "").parse().ok()
}

fn variant_url(product_url: &str, variant_id: &str) -> String {
    Url::parse(product_url).map_or_else(
        |_| product_url.to_string(),
        |mut url| {
            url.query_pairs_mut().append_pair("variant", variant_id);
            url.into()
        },
    )
}

impl SiteAdapter for CatalogAdapter {
    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn parse_listing(&self, document: &Document) -> ListingPage {
        let html = Html::parse_document(&document.body);
        let base = Url::parse(&document.url)
            .or_else(|_| Url::parse(&self.config.base_url))
            .ok();

        let mut references = Vec::new();
        for link in html.select(&self.product_link) {
            if let Some(href) = link.value().attr("href")
                && let Some(url) = Self::resolve_link(base.as_ref(), href)
                && !references.contains(&url)
            {
                references.push(url);
            }
        }

        let total_count = self.total_count.as_ref().and_then(|selector| {
            html.select(selector)
                .find_map(|element| parse_total(&element_text(element)))
        });
        let has_next = self
            .next_control
            .as_ref()
            .map(|selector| html.select(selector).next().is_some());

        ListingPage {
            references,
            total_count,
            has_next,
        }
    }

    fn parse_subcategories(&self, category: &CategorySpec, document: &Document) -> Vec<CategorySpec> {
        let Some((link, id_pattern)) = &self.subcategory_link else {
            return Vec::new();
        };
        let html = Html::parse_document(&document.body);

        let mut ids: Vec<u64> = Vec::new();
        for element in html.select(link) {
            if let Some(href) = element.value().attr("href")
                && let Some(captures) = id_pattern.captures(href)
                && let Some(id) = captures.get(1).and_then(|m| m.as_str().parse::<u64>().ok())
                && !ids.contains(&id)
            {
                ids.push(id);
            }
        }

        ids.into_iter()
            .map(|id| CategorySpec::with_id(category.label.clone(), id))
            .collect()
    }

    fn extract_product(
        &self,
        reference: &ProductReference,
        document: &Document,
    ) -> Result<Vec<RawProductRecord>, SkipReason> {
        let html = Html::parse_document(&document.body);
        let data = structured::product_data(&html);
        let meta = structured::shopify_meta(&html);

        if data == structured::ProductData::default() && meta.is_none() {
            return Err(SkipReason::NoProductData);
        }

        let name = data.name.clone().ok_or(SkipReason::MissingField("name"))?;
        let foreign_id = self
            .foreign_id_from_url(&reference.url)
            .or_else(|| data.product_id.clone())
            .or_else(|| meta.as_ref().and_then(|m| m.product_id.clone()))
            .or_else(|| data.sku.clone())
            .ok_or(SkipReason::MissingField("product id"))?;

        let brand = self
            .brand
            .as_ref()
            .and_then(|field| field.value(&html))
            .or_else(|| data.brand.clone())
            .or_else(|| meta.as_ref().and_then(|m| m.vendor.clone()));

        let (rating_text, rating_scale) = self
            .rating
            .as_ref()
            .and_then(|(field, scale)| field.value(&html).map(|value| (Some(value), *scale)))
            .unwrap_or((data.rating.clone(), RatingScale::FiveStar));

        let base = RawProductRecord {
            category: reference.category.clone(),
            foreign_id: Some(foreign_id),
            variant_id: None,
            brand,
            name: Some(name.clone()),
            price_text: data.price.clone(),
            price_encoding: PriceEncoding::Decimal,
            currency: data.currency.clone(),
            rating_text,
            rating_scale,
            size_text: data.size.clone().or(Some(name)),
            description: data.description.clone(),
            images: data.images.clone(),
            ingredients_text: self.ingredients.as_ref().and_then(|field| field.value(&html)),
            url: reference.url.clone(),
        };

        if let Some(meta) = meta.filter(|m| !m.variants.is_empty()) {
            return Ok(meta
                .variants
                .into_iter()
                .map(|variant| {
                    let size_text = [&variant.public_title, &variant.sku, &variant.name]
                        .into_iter()
                        .flatten()
                        .find(|text| parse_size(text).is_some())
                        .cloned()
                        .or_else(|| base.size_text.clone());
                    let (price_text, price_encoding) = match variant.price {
                        Some(cents) => (Some(cents.to_string()), self.config.variant_price_encoding),
                        None => (base.price_text.clone(), base.price_encoding),
                    };

                    RawProductRecord {
                        variant_id: Some(variant.id.clone()),
                        price_text,
                        price_encoding,
                        size_text,
                        url: variant_url(&reference.url, &variant.id),
                        ..base.clone()
                    }
                })
                .collect());
        }

        let sku_offers: Vec<_> = data.offers.iter().filter(|offer| offer.sku.is_some()).collect();
        if sku_offers.len() > 1 {
            return Ok(sku_offers
                .into_iter()
                .map(|offer| RawProductRecord {
                    variant_id: offer.sku.clone(),
                    price_text: offer.price.clone().or_else(|| base.price_text.clone()),
                    currency: offer.currency.clone().or_else(|| base.currency.clone()),
                    size_text: offer
                        .name
                        .clone()
                        .filter(|name| parse_size(name).is_some())
                        .or_else(|| base.size_text.clone()),
                    ..base.clone()
                })
                .collect());
        }

        Ok(vec![base])
    }
}

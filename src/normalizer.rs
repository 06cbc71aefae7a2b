//! Coercion of raw scraped strings into canonical product fields

use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use url::Url;

use crate::error::Rejection;
use crate::models::{Price, PriceEncoding, ProductRecord, RatingScale, RawProductRecord, SourceSite};
use crate::traits::SiteConfig;

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid amount regex"));

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"));

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(fl\.?\s*oz|oz|ml|mg|kg|lbs?|g|l|ct)\b")
        .expect("valid size regex")
});

/// Turns raw records from one site into validated [`ProductRecord`]s
#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    source: SourceSite,
    base_url: Url,
    default_currency: String,
}

impl FieldNormalizer {
    pub fn new(source: SourceSite, base_url: &str, default_currency: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid base url {base_url}"))?;
        Ok(Self {
            source,
            base_url,
            default_currency: default_currency.into(),
        })
    }

    pub fn for_site(config: &SiteConfig) -> Result<Self> {
        Self::new(config.source, &config.base_url, config.default_currency.clone())
    }

    /// Validate and canonicalize one raw record
    ///
    /// # Errors
    /// Returns a [`Rejection`] when brand, name or id is missing, the price
    /// cannot be read or is negative, or the product URL cannot be resolved.
    pub fn normalize(&self, raw: RawProductRecord) -> Result<ProductRecord, Rejection> {
        let foreign_id = non_empty(raw.foreign_id).ok_or(Rejection::MissingField("foreign_id"))?;
        let name = non_empty(raw.name).ok_or(Rejection::MissingField("name"))?;
        let brand = non_empty(raw.brand).ok_or(Rejection::MissingField("brand"))?;

        let price_text = non_empty(raw.price_text).ok_or(Rejection::MissingField("price"))?;
        let minor_units = parse_price(&price_text, raw.price_encoding)?;
        let currency = non_empty(raw.currency)
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        let url = self
            .absolute_url(&raw.url)
            .ok_or_else(|| Rejection::InvalidUrl(raw.url.clone()))?;

        let images = raw
            .images
            .iter()
            .filter_map(|image| self.absolute_url(image))
            .fold(Vec::new(), |mut images, image| {
                if !images.contains(&image) {
                    images.push(image);
                }
                images
            });

        Ok(ProductRecord {
            source: self.source,
            category: raw.category,
            foreign_id,
            variant_id: non_empty(raw.variant_id),
            brand: collapse_whitespace(&brand),
            name: collapse_whitespace(&name),
            price: Price::new(minor_units, currency),
            rating: raw
                .rating_text
                .as_deref()
                .and_then(|text| parse_rating(text, raw.rating_scale)),
            size: raw.size_text.as_deref().and_then(parse_size),
            description: non_empty(raw.description).map(|d| collapse_whitespace(&d)),
            images,
            ingredients: raw
                .ingredients_text
                .as_deref()
                .map(parse_ingredients)
                .unwrap_or_default(),
            url,
            scraped_at: Utc::now(),
        })
    }

    /// Resolve a possibly relative or protocol-relative URL against the site base
    pub fn absolute_url(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let mut url = self.base_url.join(raw).ok()?;
        url.set_fragment(None);
        Some(url.into())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a price into minor units.
///
/// # Errors
/// [`Rejection::UnparsablePrice`] when no amount is present (or a minor-unit
/// price carries a fraction), [`Rejection::NegativePrice`] for negative amounts.
pub fn parse_price(text: &str, encoding: PriceEncoding) -> Result<i64, Rejection> {
    let unparsable = || Rejection::UnparsablePrice(text.to_string());
    let found = AMOUNT_RE.find(text).ok_or_else(unparsable)?;

    // a minus sign directly ahead of the amount or its currency symbol
    let prefix = text[..found.start()]
        .trim_end_matches(|c: char| !c.is_alphanumeric() && !c.is_whitespace() && c != '-');
    if prefix.ends_with('-') {
        return Err(Rejection::NegativePrice(text.to_string()));
    }

    let token = found.as_str();
    match encoding {
        PriceEncoding::MinorUnits => {
            if token.contains('.') {
                return Err(unparsable());
            }
            token.replace(',', "").parse::<i64>().map_err(|_| unparsable())
        }
        PriceEncoding::Decimal => {
            let (whole, fraction) = split_decimal(token);
            let whole = whole.parse::<i64>().map_err(|_| unparsable())?;
            let cents = fraction_to_cents(&fraction);
            whole
                .checked_mul(100)
                .and_then(|w| w.checked_add(cents))
                .ok_or_else(unparsable)
        }
    }
}

/// Split a numeric token into whole and fractional digits, treating a lone
/// comma followed by exactly two digits as a decimal comma.
fn split_decimal(token: &str) -> (String, String) {
    if let Some((whole, fraction)) = token.split_once('.') {
        return (whole.replace(',', ""), fraction.to_string());
    }
    if let Some((whole, fraction)) = token.rsplit_once(',')
        && token.matches(',').count() == 1
        && fraction.len() == 2
    {
        return (whole.to_string(), fraction.to_string());
    }
    (token.replace(',', ""), String::new())
}

fn fraction_to_cents(fraction: &str) -> i64 {
    let digits: Vec<i64> = fraction
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(i64::from)
        .collect();
    let tens = digits.first().copied().unwrap_or(0);
    let units = digits.get(1).copied().unwrap_or(0);
    let round_up = i64::from(digits.get(2).copied().unwrap_or(0) >= 5);
    tens * 10 + units + round_up
}

/// Parse a rating onto the 0-5 scale; out-of-range or unreadable values are `None`.
pub fn parse_rating(text: &str, scale: RatingScale) -> Option<f32> {
    let value: f32 = NUMBER_RE.find(text)?.as_str().parse().ok()?;
    let scale = if text.contains('%') {
        RatingScale::Percent
    } else {
        scale
    };
    let stars = match scale {
        RatingScale::FiveStar => value,
        RatingScale::Percent => value / 20.0,
    };
    let stars = (stars * 100.0).round() / 100.0;
    (0.0..=5.0).contains(&stars).then_some(stars)
}

/// Pull the first quantity+unit token out of free text, e.g. `"3.4 fl oz"`.
pub fn parse_size(text: &str) -> Option<String> {
    let captures = SIZE_RE.captures(text)?;
    let quantity = captures[1].replace(',', ".");
    let unit = captures[2].to_ascii_lowercase();
    let unit = if unit.starts_with("fl") {
        "fl oz".to_string()
    } else {
        unit
    };
    Some(format!("{quantity} {unit}"))
}

/// Split an ingredient block into normalized names.
///
/// Commas inside parentheses stay with their ingredient.
pub fn parse_ingredients(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in text.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .iter()
        .map(|part| {
            let cleaned = part.replace('*', "");
            let cleaned = cleaned.trim().trim_end_matches('.').trim();
            collapse_whitespace(cleaned).to_lowercase()
        })
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> FieldNormalizer {
        FieldNormalizer::new(SourceSite::Sephora, "https://www.sephora.com", "USD").unwrap()
    }

    fn raw() -> RawProductRecord {
        RawProductRecord {
            category: "cleanser".to_string(),
            foreign_id: Some("P12345".to_string()),
            brand: Some("Tatcha".to_string()),
            name: Some("  The Rice   Wash ".to_string()),
            price_text: Some("$38.00".to_string()),
            rating_text: Some("width: 86%;".to_string()),
            rating_scale: RatingScale::Percent,
            size_text: Some("Size 4 oz/ 120 mL".to_string()),
            images: vec![
                "//cdn.sephora.com/a.jpg".to_string(),
                "/images/b.jpg".to_string(),
                "/images/b.jpg".to_string(),
            ],
            ingredients_text: Some("Water, Glycerin*, Fragrance.".to_string()),
            url: "/product/the-rice-wash-P12345#reviews".to_string(),
            ..RawProductRecord::default()
        }
    }

    #[test]
    fn parses_currency_formatted_and_minor_unit_prices() {
        assert_eq!(parse_price("$12.99", PriceEncoding::Decimal), Ok(1_299));
        assert_eq!(parse_price("1299", PriceEncoding::MinorUnits), Ok(1_299));
        assert_eq!(parse_price("USD 1,234.5", PriceEncoding::Decimal), Ok(123_450));
        assert_eq!(parse_price("12,99 €", PriceEncoding::Decimal), Ok(1_299));
        assert_eq!(parse_price("$25.00 - $40.00", PriceEncoding::Decimal), Ok(2_500));
        assert_eq!(parse_price("9.995", PriceEncoding::Decimal), Ok(1_000));
        assert_eq!(parse_price("Sale - $10", PriceEncoding::Decimal), Ok(1_000));
    }

    #[test]
    fn rejects_unreadable_and_negative_prices() {
        assert!(matches!(
            parse_price("USD", PriceEncoding::Decimal),
            Err(Rejection::UnparsablePrice(_))
        ));
        assert!(matches!(
            parse_price("12.99", PriceEncoding::MinorUnits),
            Err(Rejection::UnparsablePrice(_))
        ));
        assert!(matches!(
            parse_price("-$4.00", PriceEncoding::Decimal),
            Err(Rejection::NegativePrice(_))
        ));
    }

    #[test]
    fn parses_ratings_on_both_scales() {
        assert_eq!(parse_rating("width: 86%;", RatingScale::Percent), Some(4.3));
        assert_eq!(parse_rating("4.5", RatingScale::FiveStar), Some(4.5));
        assert_eq!(parse_rating("90%", RatingScale::FiveStar), Some(4.5));
        assert_eq!(parse_rating("7.5", RatingScale::FiveStar), None);
        assert_eq!(parse_rating("no reviews", RatingScale::FiveStar), None);
    }

    #[test]
    fn extracts_size_tokens() {
        assert_eq!(parse_size("Size 1.7 oz/ 50 mL").as_deref(), Some("1.7 oz"));
        assert_eq!(parse_size("3.4 FL. OZ").as_deref(), Some("3.4 fl oz"));
        assert_eq!(parse_size("100g jar").as_deref(), Some("100 g"));
        assert_eq!(parse_size("Travel edition"), None);
    }

    #[test]
    fn splits_and_cleans_ingredients() {
        assert_eq!(
            parse_ingredients("Water, Glycerin*, Fragrance."),
            vec!["water", "glycerin", "fragrance"]
        );
        assert_eq!(
            parse_ingredients("Aqua (Water, Eau), Parfum**,  , Citric   Acid."),
            vec!["aqua (water, eau)", "parfum", "citric acid"]
        );
        assert!(parse_ingredients("  ").is_empty());
    }

    #[test]
    fn normalizes_a_complete_record() {
        let record = normalizer().normalize(raw()).unwrap();

        assert_eq!(record.source, SourceSite::Sephora);
        assert_eq!(record.name, "The Rice Wash");
        assert_eq!(record.price, Price::new(3_800, "USD"));
        assert_eq!(record.rating, Some(4.3));
        assert_eq!(record.size.as_deref(), Some("4 oz"));
        assert_eq!(record.ingredients, vec!["water", "glycerin", "fragrance"]);
        assert_eq!(record.url, "https://www.sephora.com/product/the-rice-wash-P12345");
        assert_eq!(
            record.images,
            vec![
                "https://cdn.sephora.com/a.jpg".to_string(),
                "https://www.sephora.com/images/b.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn missing_optional_fields_are_valid() {
        let mut input = raw();
        input.rating_text = None;
        input.size_text = None;
        input.ingredients_text = None;

        let record = normalizer().normalize(input).unwrap();
        assert_eq!(record.rating, None);
        assert_eq!(record.size, None);
        assert!(record.ingredients.is_empty());
    }

    #[test]
    fn rejects_records_missing_identity_fields() {
        let mut no_brand = raw();
        no_brand.brand = Some("   ".to_string());
        assert_eq!(
            normalizer().normalize(no_brand),
            Err(Rejection::MissingField("brand"))
        );

        let mut no_id = raw();
        no_id.foreign_id = None;
        assert_eq!(
            normalizer().normalize(no_id),
            Err(Rejection::MissingField("foreign_id"))
        );
    }

    #[test]
    fn uses_site_currency_when_none_extracted() {
        let mut input = raw();
        input.currency = Some("eur".to_string());
        assert_eq!(normalizer().normalize(input).unwrap().price.currency, "EUR");
        assert_eq!(normalizer().normalize(raw()).unwrap().price.currency, "USD");
    }
}

//! Extraction of embedded structured data: schema.org JSON-LD, OpenGraph
//! meta tags and Shopify `var meta` variant blocks

use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").expect("valid selector"));
static META: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").expect("valid selector"));
static ITEMPROP_RATING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[itemprop='ratingValue']").expect("valid selector"));

/// Product fields found in a page's structured data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductData {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub product_id: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub rating: Option<String>,
    pub size: Option<String>,
    pub offers: Vec<Offer>,
}

/// One schema.org offer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Offer {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
}

/// Shopify's inline `var meta = {...}` product block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShopifyMeta {
    pub product_id: Option<String>,
    pub vendor: Option<String>,
    pub variants: Vec<ShopifyVariant>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShopifyVariant {
    pub id: String,
    /// Price in cents
    pub price: Option<i64>,
    pub name: Option<String>,
    pub public_title: Option<String>,
    pub sku: Option<String>,
}

/// Collect product data from JSON-LD, then fill the gaps from OpenGraph tags.
pub fn product_data(document: &Html) -> ProductData {
    let mut data = json_ld_product(document)
        .map(|product| from_json_ld(&product))
        .unwrap_or_default();

    fill_from_meta(document, &mut data);
    data
}

fn json_ld_product(document: &Html) -> Option<Value> {
    document
        .select(&SCRIPT)
        .filter(|script| {
            script.value().attr("type") == Some("application/ld+json")
                || script.text().any(|t| t.contains("\"@context\""))
        })
        .filter_map(|script| {
            let text = script.text().collect::<String>();
            serde_json::from_str::<Value>(text.trim()).ok()
        })
        .find_map(|value| find_product(&value).cloned())
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if is_type(value, "Product") {
                return Some(value);
            }
            map.get("@graph").and_then(find_product)
        }
        _ => None,
    }
}

fn is_type(value: &Value, wanted: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

/// Strings and numbers both show up where schema.org expects text.
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn named(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Object(_) => scalar(value?.get("name")),
        Value::Array(items) => items.iter().find_map(|item| named(Some(item))),
        other => scalar(Some(other)),
    }
}

fn images(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => items.iter().flat_map(|item| images(Some(item))).collect(),
        Some(Value::Object(map)) => scalar(map.get("url").or_else(|| map.get("contentUrl")))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn quantity(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Object(map) => {
            let amount = scalar(map.get("value"))?;
            let unit = scalar(map.get("unitText").or_else(|| map.get("unitCode")));
            Some(unit.map_or_else(|| amount.clone(), |unit| format!("{amount} {unit}")))
        }
        other => scalar(Some(other)),
    }
}

fn offer(value: &Value) -> Offer {
    Offer {
        sku: scalar(value.get("sku")),
        name: scalar(value.get("name")),
        price: scalar(value.get("price")).or_else(|| scalar(value.get("lowPrice"))),
        currency: scalar(value.get("priceCurrency")),
    }
}

fn offers(value: Option<&Value>) -> Vec<Offer> {
    match value {
        Some(Value::Array(items)) => items.iter().map(offer).collect(),
        Some(object) if object.is_object() => match object.get("offers") {
            // AggregateOffer wrapping individual offers
            Some(Value::Array(inner)) if !inner.is_empty() => inner.iter().map(offer).collect(),
            _ => vec![offer(object)],
        },
        _ => Vec::new(),
    }
}

fn from_json_ld(product: &Value) -> ProductData {
    let offers = offers(product.get("offers"));
    let (price, currency) = offers
        .iter()
        .find(|o| o.price.is_some())
        .map(|o| (o.price.clone(), o.currency.clone()))
        .unwrap_or_default();

    ProductData {
        name: scalar(product.get("name")),
        brand: named(product.get("brand")),
        product_id: scalar(product.get("productID")),
        sku: scalar(product.get("sku")),
        description: scalar(product.get("description")),
        images: images(product.get("image")),
        price,
        currency,
        rating: product
            .get("aggregateRating")
            .and_then(|rating| scalar(rating.get("ratingValue"))),
        size: quantity(product.get("weight")).or_else(|| scalar(product.get("size"))),
        offers,
    }
}

fn meta_content(document: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        document
            .select(&META)
            .find(|meta| {
                meta.value().attr("property") == Some(*key) || meta.value().attr("name") == Some(*key)
            })
            .and_then(|meta| meta.value().attr("content"))
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
    })
}

fn fill_from_meta(document: &Html, data: &mut ProductData) {
    if data.name.is_none() {
        data.name = meta_content(document, &["og:title", "twitter:title"]);
    }
    if data.description.is_none() {
        data.description = meta_content(document, &["og:description", "description"]);
    }
    if data.images.is_empty() {
        data.images = meta_content(document, &["og:image", "og:image:secure_url"])
            .into_iter()
            .collect();
    }
    if data.price.is_none() {
        data.price = meta_content(document, &["og:price:amount", "product:price:amount"]);
    }
    if data.currency.is_none() {
        data.currency = meta_content(document, &["og:price:currency", "product:price:currency"]);
    }
    if data.rating.is_none() {
        data.rating = document.select(&ITEMPROP_RATING).next().and_then(|el| {
            el.value()
                .attr("content")
                .map(str::to_string)
                .or_else(|| Some(el.text().collect::<String>()))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });
    }
}

/// Parse Shopify's `var meta = {...};` script, if the page has one.
pub fn shopify_meta(document: &Html) -> Option<ShopifyMeta> {
    document.select(&SCRIPT).find_map(|script| {
        let text = script.text().collect::<String>();
        let start = text.find("var meta")?;
        let json_start = start + text[start..].find('{')?;
        // stream a single value so trailing script code is ignored
        let meta = serde_json::Deserializer::from_str(&text[json_start..])
            .into_iter::<Value>()
            .next()?
            .ok()?;
        let product = meta.get("product")?;

        let variants = product
            .get("variants")
            .and_then(Value::as_array)
            .map(|variants| {
                variants
                    .iter()
                    .filter_map(|variant| {
                        Some(ShopifyVariant {
                            id: scalar(variant.get("id"))?,
                            price: variant.get("price").and_then(Value::as_i64),
                            name: scalar(variant.get("name")),
                            public_title: scalar(variant.get("public_title")),
                            sku: scalar(variant.get("sku")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(ShopifyMeta {
            product_id: scalar(product.get("id")),
            vendor: scalar(product.get("vendor")),
            variants,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_LD_PAGE: &str = r#"
        <html><head>
        <script type="application/ld+json">{"@context":"https://schema.org","@type":"BreadcrumbList"}</script>
        <script type="application/ld+json">
        {"@context":"http://schema.org/","@graph":[{"@type":["Product"],
          "name":"CeraVe Hydrating Cleanser","sku":"300",
          "brand":{"@type":"Brand","name":"CeraVe"},
          "image":["https://img.test/1.jpg",{"url":"https://img.test/2.jpg"}],
          "weight":{"value":"16","unitText":"oz"},
          "aggregateRating":{"ratingValue":4.6},
          "offers":{"@type":"Offer","price":"15.99","priceCurrency":"USD"}}]}
        </script>
        <meta property="og:title" content="Ignored Title">
        </head><body></body></html>"#;

    #[test]
    fn reads_product_from_json_ld_graph() {
        let data = product_data(&Html::parse_document(JSON_LD_PAGE));

        assert_eq!(data.name.as_deref(), Some("CeraVe Hydrating Cleanser"));
        assert_eq!(data.brand.as_deref(), Some("CeraVe"));
        assert_eq!(data.sku.as_deref(), Some("300"));
        assert_eq!(data.images, vec!["https://img.test/1.jpg", "https://img.test/2.jpg"]);
        assert_eq!(data.size.as_deref(), Some("16 oz"));
        assert_eq!(data.rating.as_deref(), Some("4.6"));
        assert_eq!(data.price.as_deref(), Some("15.99"));
        assert_eq!(data.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn falls_back_to_open_graph_meta() {
        let html = Html::parse_document(
            r#"<html><head>
            <meta property="og:title" content="Beautiful Balm">
            <meta property="og:image" content="//cdn.test/balm.jpg">
            <meta property="og:price:amount" content="68.00">
            <meta property="og:price:currency" content="CAD">
            <meta itemprop="ratingValue" content="4.8">
            </head><body></body></html>"#,
        );
        let data = product_data(&html);

        assert_eq!(data.name.as_deref(), Some("Beautiful Balm"));
        assert_eq!(data.images, vec!["//cdn.test/balm.jpg"]);
        assert_eq!(data.price.as_deref(), Some("68.00"));
        assert_eq!(data.currency.as_deref(), Some("CAD"));
        assert_eq!(data.rating.as_deref(), Some("4.8"));
    }

    #[test]
    fn reads_shopify_variants() {
        let html = Html::parse_document(
            r#"<html><head><script>
            var meta = {"product":{"id":4411,"vendor":"Kjaer Weis","variants":[
              {"id":101,"price":6800,"name":"Balm - 1.7oz","public_title":"1.7oz","sku":"KW-17OZ"},
              {"id":102,"price":2400,"name":"Balm - Mini","public_title":null,"sku":"KW-15ML"}]},"page":{"pageType":"product"}};
            for (var attr in meta) { window.ShopifyAnalytics.meta[attr] = meta[attr]; }
            </script></head><body></body></html>"#,
        );
        let meta = shopify_meta(&html).unwrap();

        assert_eq!(meta.product_id.as_deref(), Some("4411"));
        assert_eq!(meta.vendor.as_deref(), Some("Kjaer Weis"));
        assert_eq!(meta.variants.len(), 2);
        assert_eq!(meta.variants[0].id, "101");
        assert_eq!(meta.variants[0].price, Some(6_800));
        assert_eq!(meta.variants[1].public_title, None);
        assert_eq!(meta.variants[1].sku.as_deref(), Some("KW-15ML"));
    }

    #[test]
    fn pages_without_structured_data_yield_nothing() {
        let html = Html::parse_document("<html><body><p>Not found</p></body></html>");
        assert_eq!(product_data(&html), ProductData::default());
        assert!(shopify_meta(&html).is_none());
    }
}

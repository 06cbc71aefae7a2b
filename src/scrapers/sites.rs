//! Built-in configurations for the supported catalogs

use std::time::Duration;

use crate::models::{CategorySpec, PaginationScheme, PriceEncoding, RatingScale, SourceSite};
use crate::traits::{
    FieldSelector, RatingSelector, SiteConfig, SiteSelectors, SubcategoryDiscovery, WaitPolicy,
};

pub fn preset(site: SourceSite) -> SiteConfig {
    match site {
        SourceSite::Sephora => sephora(),
        SourceSite::Walgreens => walgreens(),
        SourceSite::DetoxMarket => detox_market(),
    }
}

pub fn sephora() -> SiteConfig {
    SiteConfig {
        source: SourceSite::Sephora,
        base_url: "https://www.sephora.com".to_string(),
        listing_url_pattern: "{base}/shop/{category}?pageSize=300&currentPage={page}".to_string(),
        pagination: PaginationScheme::PageNumber { first: 1 },
        page_size: Some(300),
        selectors: SiteSelectors {
            product_link: "[data-comp='ProductGrid'] a[href*='/product/']".to_string(),
            total_count: Some("h2".to_string()),
            next_control: None,
            brand: None,
            rating: Some(RatingSelector {
                field: FieldSelector::attr("[data-comp='StarRating'] > div", "style"),
                scale: RatingScale::Percent,
            }),
            ingredients: Some(FieldSelector::text("[data-at='ingredients'], #ingredients")),
        },
        foreign_id_pattern: Some(r"[:\-](P\d+)".to_string()),
        variant_price_encoding: PriceEncoding::Decimal,
        default_currency: "USD".to_string(),
        listing_wait: WaitPolicy::Settle {
            wait: Duration::from_secs(1),
            scroll_steps: 10,
        },
        detail_wait: WaitPolicy::Settle {
            wait: Duration::from_millis(400),
            scroll_steps: 0,
        },
        subcategories: None,
        categories: [
            "moisturizing-cream-oils-mists",
            "cleanser",
            "facial-treatments",
            "face-mask",
            "eye-treatment-dark-circle-treatment",
            "sunscreen-sun-protection",
            "self-tanning-products",
            "lip-treatments",
        ]
        .into_iter()
        .map(CategorySpec::new)
        .collect(),
    }
}

pub fn walgreens() -> SiteConfig {
    SiteConfig {
        source: SourceSite::Walgreens,
        base_url: "https://www.walgreens.com".to_string(),
        listing_url_pattern:
            "{base}/store/store/category/productlist.jsp?N={id}&Erp=72&No={offset}".to_string(),
        pagination: PaginationScheme::Offset { step: 72 },
        page_size: Some(72),
        selectors: SiteSelectors {
            product_link: "a[ng-if*='productDet.productInfo.productUR']".to_string(),
            total_count: None,
            next_control: Some("#arrow-2:not([disabled])".to_string()),
            brand: None,
            rating: None,
            ingredients: Some(FieldSelector::text("div[name='description-Ingredients']")),
        },
        foreign_id_pattern: Some(r"ID=([^-/?]+)-".to_string()),
        variant_price_encoding: PriceEncoding::Decimal,
        default_currency: "USD".to_string(),
        listing_wait: WaitPolicy::Settle {
            wait: Duration::from_secs(2),
            scroll_steps: 0,
        },
        detail_wait: WaitPolicy::Immediate,
        // Tier pages only link to the sub-category listings that hold products
        subcategories: Some(SubcategoryDiscovery {
            url_pattern: "{base}/store/c/{category}/ID={id}-tier2general".to_string(),
            link: "a.tracktier2Prop30[href*='ID=']".to_string(),
            id_pattern: r"ID=(\d+)".to_string(),
        }),
        categories: [
            ("cosmetics", 360_337),
            ("hair-care-products", 360_339),
            ("skin-care-products", 360_323),
            ("bath-and-body-products", 360_341),
            ("sun-care-products", 360_333),
            ("fragrance", 360_335),
            ("beauty-gift-sets", 360_329),
            ("nails", 360_445),
            ("accessories-and-clothing", 360_331),
            ("beauty-for-men", 360_327),
            ("natural-and-organic-beauty-products", 360_325),
        ]
        .into_iter()
        .map(|(label, id)| CategorySpec::with_id(label, id))
        .collect(),
    }
}

pub fn detox_market() -> SiteConfig {
    SiteConfig {
        source: SourceSite::DetoxMarket,
        base_url: "https://www.thedetoxmarket.com".to_string(),
        listing_url_pattern: "{base}/collections/{category}?page={page}".to_string(),
        pagination: PaginationScheme::PageNumber { first: 1 },
        page_size: None,
        selectors: SiteSelectors {
            product_link: "div.product-image a.product-grid-image".to_string(),
            total_count: None,
            next_control: None,
            brand: Some(FieldSelector::attr("meta[name='twitter:data2']", "content")),
            rating: None,
            ingredients: Some(FieldSelector::text("#ingredients_area div")),
        },
        foreign_id_pattern: None,
        // Shopify variant blocks carry prices in cents
        variant_price_encoding: PriceEncoding::MinorUnits,
        default_currency: "USD".to_string(),
        listing_wait: WaitPolicy::Settle {
            wait: Duration::from_millis(400),
            scroll_steps: 0,
        },
        detail_wait: WaitPolicy::Immediate,
        subcategories: None,
        categories: [
            "skin-care",
            "body-bath",
            "foundation",
            "blush",
            "highlighters-bronzers",
            "primer-concealer",
            "finishing-powder",
            "lips",
            "eyes-and-brows",
            "makeup-remover",
        ]
        .into_iter()
        .map(CategorySpec::new)
        .collect(),
    }
}

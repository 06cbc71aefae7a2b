pub mod catalog_crawler;
pub mod catalog_pipeline;
pub mod collector;
pub mod config;
pub mod database;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod scraper;
pub mod scrapers;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

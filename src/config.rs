//! Environment-driven configuration

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::SourceSite;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// HTTP client behaviour
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
    /// Extra attempts after the first for transient failures
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub retry_backoff: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Listing traversal limits
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Safety cap on pages per category
    pub max_pages: u32,
    /// Pause between consecutive listing pages
    pub page_delay: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_pages: 50,
            page_delay: Duration::from_millis(500),
        }
    }
}

/// Everything the crawler binary needs
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub sites: Vec<SourceSite>,
    /// Only crawl categories with these labels, when set
    pub category_filter: Option<Vec<String>>,
    pub http: HttpSettings,
    pub collector: CollectorSettings,
    pub detail_concurrency: usize,
    pub run_deadline: Option<Duration>,
    /// Cron expression for recurring crawls
    pub schedule: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let sites = match get("CATALOG_SITES") {
            Some(list) => split_list(&list)
                .map(|s| s.parse::<SourceSite>())
                .collect::<Result<Vec<_>>>()
                .context("invalid CATALOG_SITES")?,
            None => SourceSite::ALL.to_vec(),
        };

        let defaults = HttpSettings::default();
        let http = HttpSettings {
            user_agent: get("USER_AGENT").unwrap_or(defaults.user_agent),
            timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 30)?),
            max_retries: parse_or(&get, "MAX_RETRIES", defaults.max_retries)?,
            retry_backoff: Duration::from_millis(parse_or(&get, "RETRY_BACKOFF_MS", 500)?),
        };

        let collector = CollectorSettings {
            max_pages: parse_or(&get, "MAX_PAGES", 50)?,
            page_delay: Duration::from_millis(parse_or(&get, "PAGE_DELAY_MS", 500)?),
        };

        let detail_concurrency: usize = parse_or(&get, "DETAIL_CONCURRENCY", 1)?;
        if detail_concurrency == 0 {
            anyhow::bail!("DETAIL_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:database/catalog.db".to_string()),
            sites,
            category_filter: get("CATALOG_CATEGORIES")
                .map(|list| split_list(&list).map(str::to_string).collect()),
            http,
            collector,
            detail_concurrency,
            run_deadline: get("RUN_DEADLINE_SECS")
                .map(|v| v.parse::<u64>().map(Duration::from_secs))
                .transpose()
                .context("invalid RUN_DEADLINE_SECS")?,
            schedule: get("CATALOG_SCHEDULE"),
        })
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    get(key).map_or(Ok(default), |value| {
        value
            .parse::<T>()
            .with_context(|| format!("invalid {key}: {value:?}"))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_cover_every_site() {
        let config = config(&[]).unwrap();
        assert_eq!(config.sites, SourceSite::ALL.to_vec());
        assert_eq!(config.database_url, "sqlite:database/catalog.db");
        assert_eq!(config.collector.max_pages, 50);
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.detail_concurrency, 1);
        assert!(config.category_filter.is_none());
        assert!(config.schedule.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("CATALOG_SITES", "sephora, detox-market"),
            ("CATALOG_CATEGORIES", "cleanser,lips"),
            ("MAX_PAGES", "5"),
            ("DETAIL_CONCURRENCY", "4"),
            ("RUN_DEADLINE_SECS", "600"),
            ("CATALOG_SCHEDULE", "0 0 */6 * * *"),
        ])
        .unwrap();

        assert_eq!(config.sites, vec![SourceSite::Sephora, SourceSite::DetoxMarket]);
        assert_eq!(
            config.category_filter,
            Some(vec!["cleanser".to_string(), "lips".to_string()])
        );
        assert_eq!(config.collector.max_pages, 5);
        assert_eq!(config.detail_concurrency, 4);
        assert_eq!(config.run_deadline, Some(Duration::from_secs(600)));
        assert_eq!(config.schedule.as_deref(), Some("0 0 */6 * * *"));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config(&[("MAX_PAGES", "lots")]).is_err());
        assert!(config(&[("CATALOG_SITES", "amazon")]).is_err());
        assert!(config(&[("DETAIL_CONCURRENCY", "0")]).is_err());
    }
}

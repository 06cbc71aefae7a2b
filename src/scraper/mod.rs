use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HttpSettings;
use crate::error::FetchError;
use crate::traits::{Document, PageRenderer, WaitPolicy};

/// Plain HTTP renderer.
///
/// Pages come back as served; scripts are not executed, so the wait policy
/// is only logged.
pub struct HttpRenderer {
    client: Client,
    settings: HttpSettings,
}

impl HttpRenderer {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .build()?;

        Ok(Self { client, settings })
    }

    async fn get_once(&self, url: &str) -> Result<Document, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(transport)?;

        Ok(Document {
            url: final_url,
            body,
        })
    }
}

/// Delay before retry number `attempt` (starting at 1)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(
        &self,
        url: &str,
        wait: WaitPolicy,
        cancel: &CancellationToken,
    ) -> Result<Document, FetchError> {
        if let WaitPolicy::Settle { wait, .. } = wait {
            debug!("Fetching {} without script rendering (settle {:?} ignored)", url, wait);
        }

        let cancelled = || FetchError::Cancelled {
            url: url.to_string(),
        };
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled()),
                result = self.get_once(url) => result,
            };

            match result {
                Ok(document) => return Ok(document),
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    warn!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt, url, e, delay
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(cancelled()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Clone for HttpRenderer {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            settings: self.settings.clone(),
        }
    }
}

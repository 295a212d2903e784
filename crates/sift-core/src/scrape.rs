use std::time::Duration;

use rand::seq::SliceRandom;

use crate::config::{DenyList, ScraperConfig};
use crate::error::AppError;
use crate::models::{InvalidReason, ScrapeOutcome, ScrapedPage, WorkItem};
use crate::traits::{BrowserProvider, BrowserSession, Cleaner};
use crate::util::is_homepage;

/// Desktop user agents rotated per navigation attempt.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.67",
];

/// Pause after failed attempt `attempt` (1-based) before the next one.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0])
}

/// What is read from a settled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    /// Sanitized `<body>` markup, pruned afterwards by the cleaner.
    Sanitized,
    /// The full document as loaded, for offers parsed without the
    /// extraction service.
    Document,
}

/// Where one navigation attempt landed.
enum Landing {
    Page { html: String, final_url: String },
    Invalid { reason: InvalidReason, url: String },
}

/// Drives a browser session through a product page: deny-list check,
/// navigation with retries and backoff, page classification, sanitization.
pub struct ScrapeOrchestrator<P, C>
where
    P: BrowserProvider,
    C: Cleaner,
{
    browser: P,
    cleaner: C,
    config: ScraperConfig,
    deny_list: DenyList,
    native_offer: Option<i64>,
}

impl<P, C> ScrapeOrchestrator<P, C>
where
    P: BrowserProvider,
    C: Cleaner,
{
    pub fn new(browser: P, cleaner: C, config: ScraperConfig, deny_list: DenyList) -> Self {
        Self {
            browser,
            cleaner,
            config,
            deny_list,
            native_offer: None,
        }
    }

    /// Offer whose pages are captured whole instead of sanitized.
    pub fn with_native_offer(mut self, offer_id: Option<i64>) -> Self {
        self.native_offer = offer_id;
        self
    }

    /// Scrape one work item.
    ///
    /// Terminal classifications come back as [`ScrapeOutcome::Invalid`];
    /// everything else that goes wrong is an `Err`, with
    /// [`AppError::ScrapeExhausted`] once every attempt failed.
    pub async fn scrape(&self, item: &WorkItem) -> Result<ScrapeOutcome, AppError> {
        if self.deny_list.contains(item.offer_id) {
            tracing::info!(key = %item.natural_key, offer_id = item.offer_id, "Offer is deny-listed, skipping");
            return Ok(ScrapeOutcome::Invalid {
                reason: InvalidReason::DisallowedBrand,
                url: item.url.clone(),
            });
        }

        let session = tokio::time::timeout(self.config.connect_timeout, self.browser.acquire())
            .await
            .map_err(|_| AppError::Timeout(self.config.connect_timeout.as_millis() as u64))??;

        let capture = if self.native_offer == Some(item.offer_id) {
            Capture::Document
        } else {
            Capture::Sanitized
        };
        let landing = self.navigate_with_retries(&session, &item.url, capture).await;
        session.close().await;

        match landing? {
            Landing::Invalid { reason, url } => {
                tracing::info!(key = %item.natural_key, %url, %reason, "Page classified invalid");
                Ok(ScrapeOutcome::Invalid { reason, url })
            }
            Landing::Page { html, final_url } => {
                let content = match capture {
                    Capture::Sanitized => self.cleaner.clean(&html)?,
                    Capture::Document => html.clone(),
                };
                tracing::info!(
                    key = %item.natural_key,
                    %final_url,
                    raw_bytes = html.len(),
                    clean_bytes = content.len(),
                    "Page scraped"
                );
                Ok(ScrapeOutcome::Scraped(ScrapedPage { content, final_url }))
            }
        }
    }

    async fn navigate_with_retries(
        &self,
        session: &P::Session,
        url: &str,
        capture: Capture,
    ) -> Result<Landing, AppError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(session, url, capture).await {
                Ok(landing) => return Ok(landing),
                Err(e) if !e.is_retryable() => {
                    tracing::error!(%url, attempt, error = %e, "Scrape attempt failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, max_attempts, error = %e, "Scrape attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff_delay(self.config.retry_base_delay, attempt)).await;
                    }
                }
            }
        }

        Err(AppError::ScrapeExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        session: &P::Session,
        url: &str,
        capture: Capture,
    ) -> Result<Landing, AppError> {
        session.set_user_agent(random_user_agent()).await?;

        let nav = tokio::time::timeout(self.config.page_timeout, session.navigate(url))
            .await
            .map_err(|_| AppError::Timeout(self.config.page_timeout.as_millis() as u64))??;
        tokio::time::sleep(self.config.settle_delay).await;

        let final_url = nav.final_url(url);
        tracing::debug!(%url, status = ?nav.status, %final_url, "Navigation settled");

        if nav.status == Some(404) {
            return Ok(Landing::Invalid {
                reason: InvalidReason::NotFound,
                url: final_url,
            });
        }
        if is_homepage(&final_url) {
            return Ok(Landing::Invalid {
                reason: InvalidReason::HomepageShape,
                url: final_url,
            });
        }
        if let Some(status @ (403 | 503)) = nav.status {
            return Err(AppError::AntiBotBlock { status });
        }

        let read = async {
            match capture {
                Capture::Sanitized => session.sanitized_body().await,
                Capture::Document => session.document_html().await,
            }
        };
        let body = tokio::time::timeout(self.config.extraction_timeout, read)
            .await
            .map_err(|_| AppError::Timeout(self.config.extraction_timeout.as_millis() as u64))??;

        match body {
            Some(html) => Ok(Landing::Page { html, final_url }),
            None => Err(AppError::BodyMissing),
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which stage of the pipeline a queue feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Raw work items waiting for a browser.
    Scrape,
    /// Sanitized pages waiting for the extraction service.
    Extraction,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Scrape => "scrape",
            QueueKind::Extraction => "extraction",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One URL/offer/natural-key triple to acquire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    /// External product identity (`idProductSmi`), stable across retries.
    pub natural_key: String,
    pub offer_id: i64,
    pub queue_kind: QueueKind,
}

impl WorkItem {
    pub fn new(url: impl Into<String>, natural_key: impl Into<String>, offer_id: i64) -> Self {
        Self {
            url: url.into(),
            natural_key: natural_key.into(),
            offer_id,
            queue_kind: QueueKind::Scrape,
        }
    }

    pub fn to_scrape_message(&self) -> ScrapeMessage {
        ScrapeMessage {
            url: self.url.clone(),
            key: self.natural_key.clone(),
            offer_id: self.offer_id,
        }
    }
}

/// Scrape-queue wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeMessage {
    pub url: String,
    pub key: String,
    #[serde(rename = "offerId")]
    pub offer_id: i64,
}

impl ScrapeMessage {
    pub fn work_item(&self) -> WorkItem {
        WorkItem::new(&self.url, &self.key, self.offer_id)
    }
}

/// Extraction-queue wire format.
///
/// `api_key` is absent when the scrape stage publishes the message; the
/// consumer engine fills it with the queue's active credential on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMessage {
    pub url: String,
    pub model: String,
    pub key: String,
    #[serde(rename = "offerId")]
    pub offer_id: i64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ExtractionMessage {
    pub fn work_item(&self) -> WorkItem {
        WorkItem {
            url: self.url.clone(),
            natural_key: self.key.clone(),
            offer_id: self.offer_id,
            queue_kind: QueueKind::Extraction,
        }
    }
}

/// Why a work item can never be scraped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReason {
    /// The offer is on the static deny-list.
    DisallowedBrand,
    /// The target URL answered 404.
    NotFound,
    /// The final URL is a (possibly localized) site root.
    HomepageShape,
}

impl InvalidReason {
    pub fn message(&self) -> &'static str {
        match self {
            InvalidReason::DisallowedBrand => "This brand is not allowed to be scraped",
            InvalidReason::NotFound => "URL returns 404 Not Found",
            InvalidReason::HomepageShape => "The URL represents a Homepage.",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Sanitized markup produced by one successful scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPage {
    pub content: String,
    /// Where the page actually lives after redirects.
    pub final_url: String,
}

/// Result of a scrape that did not fail transiently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Scraped(ScrapedPage),
    Invalid { reason: InvalidReason, url: String },
}

/// A validated product ready to insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProduct {
    pub id_product: String,
    pub id_product_smi: String,
    pub offer_id: i64,
    pub url: String,
    pub product_name: String,
    pub color: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub availability: Option<bool>,
    pub keywords: Option<String>,
}

/// A persisted product row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id_product: String,
    pub id_product_smi: String,
    pub offer_id: i64,
    pub url: String,
    pub product_name: String,
    pub color: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub availability: Option<bool>,
    pub keywords: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What happened when a product insert was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A product with the same natural key already exists; nothing written.
    AlreadyExists,
}

/// A failure to record in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFailure {
    pub natural_key: String,
    pub url: String,
    pub offer_id: i64,
    pub error_message: String,
    pub id_product: Option<String>,
}

impl NewFailure {
    pub fn for_item(item: &WorkItem, error_message: impl Into<String>) -> Self {
        Self {
            natural_key: item.natural_key.clone(),
            url: item.url.clone(),
            offer_id: item.offer_id,
            error_message: error_message.into(),
            id_product: None,
        }
    }

    pub fn with_id_product(mut self, id_product: Option<String>) -> Self {
        self.id_product = id_product;
        self
    }
}

/// Ledger row for a natural key that failed at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub natural_key: String,
    pub url: String,
    pub offer_id: i64,
    pub error_message: String,
    pub retry_count: u32,
    pub resolved: bool,
    pub ignore: bool,
    pub id_product: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A work item classified as structurally unscrapable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvalid {
    pub natural_key: String,
    pub offer_id: i64,
    pub url: String,
    pub reason: String,
}

/// A persisted invalid row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRecord {
    pub natural_key: String,
    pub offer_id: i64,
    pub url: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// A failed item eligible to be scraped again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryCandidate {
    pub url: String,
    pub natural_key: String,
    pub offer_id: i64,
}

impl RetryCandidate {
    pub fn to_scrape_message(&self) -> ScrapeMessage {
        ScrapeMessage {
            url: self.url.clone(),
            key: self.natural_key.clone(),
            offer_id: self.offer_id,
        }
    }
}

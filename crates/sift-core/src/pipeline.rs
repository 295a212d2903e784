//! Queue handlers for the two pipeline stages.
//!
//! Every per-item failure is converted into a ledger entry here. A handler
//! only returns `Err` when that bookkeeping (or the hand-off to the next
//! queue) itself failed, in which case the message is redelivered.

use std::sync::Arc;

use crate::broker::Broker;
use crate::consumer::MessageHandler;
use crate::error::AppError;
use crate::models::{
    ExtractionMessage, InsertOutcome, InvalidReason, NewFailure, NewInvalid, ScrapeMessage,
    ScrapeOutcome, ScrapedPage, WorkItem,
};
use crate::scrape::ScrapeOrchestrator;
use crate::traits::{
    BrowserProvider, Cleaner, ExtractionRequest, Extractor, FailureLedger, InvalidStore,
    PageParser, ProductStore,
};
use crate::validate::{ProductValidator, SENTINEL_VALUES};

/// Where a work item ended up after a handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Sanitized content was published to the extraction queue.
    Forwarded { final_url: String },
    Persisted,
    /// A product with the same natural key was already stored.
    AlreadyPersisted,
    Invalid(InvalidReason),
    /// Recorded in the failure ledger with this message.
    Failed { message: String },
}

enum Stage {
    Page(ScrapedPage),
    Done(Disposition),
}

async fn record_failure<L: FailureLedger>(
    ledger: &L,
    item: &WorkItem,
    error: &AppError,
    id_product: Option<String>,
) -> Result<Disposition, AppError> {
    let message = error.to_string();
    tracing::warn!(
        key = %item.natural_key,
        url = %item.url,
        queue = %item.queue_kind,
        retryable = error.is_retryable(),
        error = %message,
        "Work item failed"
    );
    let record = ledger
        .record_failure(&NewFailure::for_item(item, &message).with_id_product(id_product))
        .await?;
    tracing::debug!(key = %record.natural_key, retry_count = record.retry_count, "Failure recorded");
    Ok(Disposition::Failed { message })
}

// ---------------------------------------------------------------------------
// Scrape stage
// ---------------------------------------------------------------------------

/// Consumes the scrape queue: scrapes the page and forwards the sanitized
/// content to the extraction queue.
pub struct ScrapeHandler<P, C, B, L, I>
where
    P: BrowserProvider,
    C: Cleaner,
    B: Broker,
    L: FailureLedger,
    I: InvalidStore,
{
    orchestrator: Arc<ScrapeOrchestrator<P, C>>,
    broker: B,
    ledger: L,
    invalid: I,
    extraction_queue: String,
    model: String,
}

impl<P, C, B, L, I> Clone for ScrapeHandler<P, C, B, L, I>
where
    P: BrowserProvider,
    C: Cleaner,
    B: Broker,
    L: FailureLedger,
    I: InvalidStore,
{
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            broker: self.broker.clone(),
            ledger: self.ledger.clone(),
            invalid: self.invalid.clone(),
            extraction_queue: self.extraction_queue.clone(),
            model: self.model.clone(),
        }
    }
}

impl<P, C, B, L, I> ScrapeHandler<P, C, B, L, I>
where
    P: BrowserProvider,
    C: Cleaner,
    B: Broker,
    L: FailureLedger,
    I: InvalidStore,
{
    pub fn new(
        orchestrator: ScrapeOrchestrator<P, C>,
        broker: B,
        ledger: L,
        invalid: I,
        extraction_queue: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            broker,
            ledger,
            invalid,
            extraction_queue: extraction_queue.into(),
            model: model.into(),
        }
    }

    /// Scrape `item` and publish the result for extraction.
    pub async fn process(&self, item: &WorkItem) -> Result<Disposition, AppError> {
        let page = match self.scrape(item).await? {
            Stage::Page(page) => page,
            Stage::Done(disposition) => return Ok(disposition),
        };

        let message = ExtractionMessage {
            url: page.final_url.clone(),
            model: self.model.clone(),
            key: item.natural_key.clone(),
            offer_id: item.offer_id,
            content: page.content,
            api_key: None,
        };
        self.broker
            .publish(&self.extraction_queue, &serde_json::to_value(&message)?)
            .await?;
        tracing::info!(key = %item.natural_key, queue = %self.extraction_queue, "Content forwarded for extraction");

        Ok(Disposition::Forwarded {
            final_url: page.final_url,
        })
    }

    /// Scrape `item` and run extraction in the same task, bypassing the
    /// extraction queue.
    pub async fn process_inline<E, N, S>(
        &self,
        item: &WorkItem,
        extraction: &ExtractionHandler<E, N, S, L>,
        api_key: &str,
    ) -> Result<Disposition, AppError>
    where
        E: Extractor,
        N: PageParser,
        S: ProductStore,
    {
        match self.scrape(item).await? {
            Stage::Done(disposition) => Ok(disposition),
            Stage::Page(page) => {
                let mut target = item.clone();
                target.url = page.final_url;
                extraction
                    .process(&target, &page.content, &self.model, api_key)
                    .await
            }
        }
    }

    async fn scrape(&self, item: &WorkItem) -> Result<Stage, AppError> {
        match self.orchestrator.scrape(item).await {
            Ok(ScrapeOutcome::Scraped(page)) => Ok(Stage::Page(page)),
            Ok(ScrapeOutcome::Invalid { reason, url }) => {
                let invalid = NewInvalid {
                    natural_key: item.natural_key.clone(),
                    offer_id: item.offer_id,
                    url,
                    reason: reason.message().to_string(),
                };
                match self.invalid.record_invalid(&invalid).await {
                    Ok(()) => Ok(Stage::Done(Disposition::Invalid(reason))),
                    Err(e) => {
                        let mut failed_item = item.clone();
                        failed_item.url = invalid.url;
                        Ok(Stage::Done(
                            record_failure(&self.ledger, &failed_item, &e, None).await?,
                        ))
                    }
                }
            }
            Err(e) => Ok(Stage::Done(
                record_failure(&self.ledger, item, &e, None).await?,
            )),
        }
    }
}

impl<P, C, B, L, I> MessageHandler for ScrapeHandler<P, C, B, L, I>
where
    P: BrowserProvider,
    C: Cleaner,
    B: Broker,
    L: FailureLedger,
    I: InvalidStore,
{
    type Message = ScrapeMessage;

    async fn handle(&self, message: ScrapeMessage) -> Result<(), AppError> {
        self.process(&message.work_item()).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Extraction stage
// ---------------------------------------------------------------------------

/// Consumes the extraction queue: extract, validate, persist.
///
/// Content of the validator's native offer is a whole document and goes
/// through the page parser; everything else goes to the extraction service.
pub struct ExtractionHandler<E, N, S, L>
where
    E: Extractor,
    N: PageParser,
    S: ProductStore,
    L: FailureLedger,
{
    extractor: E,
    parser: N,
    store: S,
    ledger: L,
    validator: Arc<ProductValidator>,
    fallback_api_key: Option<String>,
}

impl<E, N, S, L> Clone for ExtractionHandler<E, N, S, L>
where
    E: Extractor,
    N: PageParser,
    S: ProductStore,
    L: FailureLedger,
{
    fn clone(&self) -> Self {
        Self {
            extractor: self.extractor.clone(),
            parser: self.parser.clone(),
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            validator: Arc::clone(&self.validator),
            fallback_api_key: self.fallback_api_key.clone(),
        }
    }
}

impl<E, N, S, L> ExtractionHandler<E, N, S, L>
where
    E: Extractor,
    N: PageParser,
    S: ProductStore,
    L: FailureLedger,
{
    pub fn new(extractor: E, parser: N, store: S, ledger: L, validator: ProductValidator) -> Self {
        Self {
            extractor,
            parser,
            store,
            ledger,
            validator: Arc::new(validator),
            fallback_api_key: None,
        }
    }

    /// Credential used when a message arrives without one (queues without
    /// a daily limit do not attach credentials).
    pub fn with_fallback_api_key(mut self, api_key: Option<String>) -> Self {
        self.fallback_api_key = api_key;
        self
    }

    pub async fn process(
        &self,
        item: &WorkItem,
        content: &str,
        model: &str,
        api_key: &str,
    ) -> Result<Disposition, AppError> {
        let extracted = if self.validator.native_offer() == Some(item.offer_id) {
            tracing::debug!(key = %item.natural_key, "Parsing page metadata directly");
            self.parser.parse(content)
        } else {
            let request = ExtractionRequest {
                content,
                url: &item.url,
                model,
                api_key,
            };
            self.extractor.extract(request).await
        };
        let extracted = match extracted {
            Ok(value) => value,
            Err(e) => return record_failure(&self.ledger, item, &e, None).await,
        };

        let product = match self.validator.validate(&extracted, item) {
            Ok(product) => product,
            Err(e) => {
                return record_failure(&self.ledger, item, &e, id_product_hint(&extracted)).await;
            }
        };

        match self.store.insert_product(&product).await {
            Ok(InsertOutcome::Inserted) => {
                tracing::info!(key = %item.natural_key, id_product = %product.id_product, "Product saved");
                Ok(Disposition::Persisted)
            }
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::info!(key = %item.natural_key, "Product already stored, skipping");
                Ok(Disposition::AlreadyPersisted)
            }
            Err(e) => record_failure(&self.ledger, item, &e, Some(product.id_product)).await,
        }
    }
}

impl<E, N, S, L> MessageHandler for ExtractionHandler<E, N, S, L>
where
    E: Extractor,
    N: PageParser,
    S: ProductStore,
    L: FailureLedger,
{
    type Message = ExtractionMessage;

    async fn handle(&self, message: ExtractionMessage) -> Result<(), AppError> {
        let item = message.work_item();
        let api_key = message
            .api_key
            .as_deref()
            .or(self.fallback_api_key.as_deref())
            .unwrap_or_default();
        self.process(&item, &message.content, &message.model, api_key)
            .await
            .map(|_| ())
    }
}

/// The product id the extraction service reported, if it is usable.
fn id_product_hint(extracted: &serde_json::Value) -> Option<String> {
    match extracted.get("id_product")? {
        serde_json::Value::String(s) if !SENTINEL_VALUES.contains(&s.as_str()) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

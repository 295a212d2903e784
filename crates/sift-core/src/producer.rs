use serde::Deserialize;

use crate::broker::Broker;
use crate::error::AppError;
use crate::models::WorkItem;
use crate::traits::FailureLedger;

/// One entry of an `{"articles": [...]}` batch file.
#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    pub url: String,
    pub key: String,
    #[serde(alias = "offerId")]
    pub offerid: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleBatch {
    #[serde(default)]
    pub articles: Vec<Article>,
}

impl ArticleBatch {
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.articles
            .iter()
            .map(|a| WorkItem::new(&a.url, &a.key, a.offerid))
            .collect()
    }
}

/// Publishes work items onto the scrape queue.
#[derive(Clone)]
pub struct WorkProducer<B: Broker> {
    broker: B,
    scrape_queue: String,
}

impl<B: Broker> WorkProducer<B> {
    pub fn new(broker: B, scrape_queue: impl Into<String>) -> Self {
        Self {
            broker,
            scrape_queue: scrape_queue.into(),
        }
    }

    pub async fn enqueue(&self, item: &WorkItem) -> Result<i64, AppError> {
        let payload = serde_json::to_value(item.to_scrape_message())?;
        let id = self.broker.publish(&self.scrape_queue, &payload).await?;
        tracing::debug!(key = %item.natural_key, %id, queue = %self.scrape_queue, "Work item enqueued");
        Ok(id)
    }

    pub async fn enqueue_all(&self, items: &[WorkItem]) -> Result<usize, AppError> {
        for item in items {
            self.enqueue(item).await?;
        }
        tracing::info!(count = items.len(), queue = %self.scrape_queue, "Work items enqueued");
        Ok(items.len())
    }

    /// Re-enqueue up to `limit` retry candidates from the failure ledger.
    pub async fn requeue_failed<L: FailureLedger>(
        &self,
        ledger: &L,
        denied_offer_ids: &[i64],
        limit: usize,
    ) -> Result<usize, AppError> {
        let candidates = ledger.retry_candidates(denied_offer_ids, limit).await?;
        for candidate in &candidates {
            let payload = serde_json::to_value(candidate.to_scrape_message())?;
            self.broker.publish(&self.scrape_queue, &payload).await?;
        }
        tracing::info!(count = candidates.len(), queue = %self.scrape_queue, "Retry candidates re-enqueued");
        Ok(candidates.len())
    }
}

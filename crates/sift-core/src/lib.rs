pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod quota;
pub mod scrape;
pub mod traits;
pub mod util;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

pub use broker::{Broker, Delivery};
pub use config::{DenyList, ExtractionConfig, PipelineConfig, QueueConfig, ScraperConfig};
pub use consumer::{
    ConsumerEvent, ConsumerGroup, ConsumerReporter, MessageHandler, QueueConsumer,
    TracingConsumerReporter,
};
pub use error::AppError;
pub use models::{
    ExtractionMessage, FailedRecord, InsertOutcome, InvalidReason, InvalidRecord, NewFailure,
    NewInvalid, NewProduct, Product, QueueKind, RetryCandidate, ScrapeMessage, ScrapeOutcome,
    ScrapedPage, WorkItem,
};
pub use pipeline::{Disposition, ExtractionHandler, ScrapeHandler};
pub use producer::{ArticleBatch, WorkProducer};
pub use quota::{Clock, CredentialRing, SystemClock};
pub use scrape::ScrapeOrchestrator;
pub use traits::{
    BrowserProvider, BrowserSession, Cleaner, ExtractionRequest, Extractor, FailureLedger,
    InvalidStore, NavigationResult, PageParser, ProductStore,
};
pub use validate::ProductValidator;

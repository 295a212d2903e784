use std::future::Future;

use crate::error::AppError;
use crate::models::{
    FailedRecord, InsertOutcome, InvalidRecord, NewFailure, NewInvalid, NewProduct, Product,
    RetryCandidate,
};

/// What a navigation produced, returned as a value once the page settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationResult {
    /// HTTP status of the document response, when one was observed.
    pub status: Option<u16>,
    /// URL of the document response (after any redirects the browser followed).
    pub url: String,
    /// `Location` header when the observed response is itself a redirect.
    pub location: Option<String>,
}

impl NavigationResult {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, Some(300..=399))
    }

    /// The URL the work item should be tracked under from now on.
    pub fn final_url(&self, requested: &str) -> String {
        if self.is_redirect() {
            if let Some(location) = &self.location {
                if let Ok(resolved) = url::Url::parse(requested).and_then(|base| base.join(location))
                {
                    return resolved.to_string();
                }
            }
        }
        if self.url.is_empty() {
            requested.to_string()
        } else {
            self.url.clone()
        }
    }
}

/// Hands out browser sessions.
pub trait BrowserProvider: Send + Sync + Clone {
    type Session: BrowserSession;

    fn acquire(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// One live browser tab. Must be released with [`BrowserSession::close`];
/// implementations also release on drop so an aborted task cannot leak it.
pub trait BrowserSession: Send + Sync {
    fn set_user_agent(&self, user_agent: &str)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn navigate(&self, url: &str) -> impl Future<Output = Result<NavigationResult, AppError>> + Send;

    /// Strip decoration in the page and serialize `<body>`.
    ///
    /// Returns `None` when the document has no body.
    fn sanitized_body(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Serialize the whole document untouched, `<head>` included.
    ///
    /// Returns `None` when the document has no body.
    fn document_html(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Post-processes serialized markup outside the page.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

/// Inputs of one extraction call.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub content: &'a str,
    pub url: &'a str,
    pub model: &'a str,
    pub api_key: &'a str,
}

/// Turns sanitized markup into raw product fields via the extraction service.
pub trait Extractor: Send + Sync + Clone {
    fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;
}

/// Reads product fields straight out of a page's markup, for offers whose
/// pages carry structured metadata.
pub trait PageParser: Send + Sync + Clone {
    fn parse(&self, html: &str) -> Result<serde_json::Value, AppError>;
}

/// Product persistence.
pub trait ProductStore: Send + Sync + Clone {
    fn insert_product(
        &self,
        product: &NewProduct,
    ) -> impl Future<Output = Result<InsertOutcome, AppError>> + Send;

    fn get_by_natural_key(
        &self,
        natural_key: &str,
    ) -> impl Future<Output = Result<Option<Product>, AppError>> + Send;
}

/// Durable bookkeeping of failed work items.
pub trait FailureLedger: Send + Sync + Clone {
    /// Insert with `retry_count = 0`, or replace the message and increment.
    fn record_failure(
        &self,
        failure: &NewFailure,
    ) -> impl Future<Output = Result<FailedRecord, AppError>> + Send;

    fn get_failure(
        &self,
        natural_key: &str,
    ) -> impl Future<Output = Result<Option<FailedRecord>, AppError>> + Send;

    /// Mark resolved every record whose natural key now has a product.
    fn mark_resolved(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Mark ignored every record matching the ignore policy.
    fn apply_ignore_policy(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn retry_candidates(
        &self,
        denied_offer_ids: &[i64],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RetryCandidate>, AppError>> + Send;
}

/// Terminal bookkeeping of unscrapable work items.
pub trait InvalidStore: Send + Sync + Clone {
    fn record_invalid(
        &self,
        invalid: &NewInvalid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn list_invalid(
        &self,
        natural_key: &str,
    ) -> impl Future<Output = Result<Vec<InvalidRecord>, AppError>> + Send;
}

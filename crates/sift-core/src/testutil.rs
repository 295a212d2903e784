//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls. Error injections are one-shot:
//! the next call fails, later calls behave normally.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::{Broker, Delivery};
use crate::consumer::{ConsumerEvent, ConsumerReporter, MessageHandler};
use crate::error::AppError;
use crate::ledger::{apply_failure, is_retry_candidate, should_ignore};
use crate::models::{
    FailedRecord, InsertOutcome, InvalidRecord, NewFailure, NewInvalid, NewProduct, Product,
    RetryCandidate,
};
use crate::quota::Clock;
use crate::traits::{
    BrowserProvider, BrowserSession, Cleaner, ExtractionRequest, Extractor, FailureLedger,
    InvalidStore, NavigationResult, PageParser, ProductStore,
};

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

pub const DEFAULT_BODY: &str = "<main><h1>Product</h1></main>";

#[derive(Default)]
struct BrowserState {
    navigations: VecDeque<Result<NavigationResult, AppError>>,
    bodies: VecDeque<Result<Option<String>, AppError>>,
    documents: VecDeque<Result<Option<String>, AppError>>,
    navigation_delay: Option<Duration>,
    acquire_delay: Option<Duration>,
    acquired: usize,
    closed: usize,
    navigations_made: usize,
    body_reads: usize,
    document_reads: usize,
    user_agents: Vec<String>,
}

/// Scripted browser. Navigations, bodies and documents are consumed in
/// order; once a script runs out, navigation answers 200 for the requested
/// URL and the body is [`DEFAULT_BODY`].
#[derive(Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_navigation(self, result: Result<NavigationResult, AppError>) -> Self {
        self.state.lock().unwrap().navigations.push_back(result);
        self
    }

    pub fn with_body(self, result: Result<Option<String>, AppError>) -> Self {
        self.state.lock().unwrap().bodies.push_back(result);
        self
    }

    pub fn with_document(self, result: Result<Option<String>, AppError>) -> Self {
        self.state.lock().unwrap().documents.push_back(result);
        self
    }

    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().navigation_delay = Some(delay);
        self
    }

    pub fn with_acquire_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().acquire_delay = Some(delay);
        self
    }

    pub fn acquired(&self) -> usize {
        self.state.lock().unwrap().acquired
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn navigations(&self) -> usize {
        self.state.lock().unwrap().navigations_made
    }

    pub fn body_reads(&self) -> usize {
        self.state.lock().unwrap().body_reads
    }

    pub fn document_reads(&self) -> usize {
        self.state.lock().unwrap().document_reads
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.state.lock().unwrap().user_agents.clone()
    }
}

pub struct MockSession {
    state: Arc<Mutex<BrowserState>>,
}

impl BrowserProvider for MockBrowser {
    type Session = MockSession;

    async fn acquire(&self) -> Result<MockSession, AppError> {
        let delay = self.state.lock().unwrap().acquire_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().unwrap().acquired += 1;
        Ok(MockSession {
            state: Arc::clone(&self.state),
        })
    }
}

impl BrowserSession for MockSession {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .user_agents
            .push(user_agent.to_string());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<NavigationResult, AppError> {
        let (delay, next) = {
            let mut state = self.state.lock().unwrap();
            state.navigations_made += 1;
            (state.navigation_delay, state.navigations.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| {
            Ok(NavigationResult {
                status: Some(200),
                url: url.to_string(),
                location: None,
            })
        })
    }

    async fn sanitized_body(&self) -> Result<Option<String>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.body_reads += 1;
        state
            .bodies
            .pop_front()
            .unwrap_or_else(|| Ok(Some(DEFAULT_BODY.to_string())))
    }

    async fn document_html(&self) -> Result<Option<String>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.document_reads += 1;
        state
            .documents
            .pop_front()
            .unwrap_or_else(|| Ok(Some(format!("<html><body>{DEFAULT_BODY}</body></html>"))))
    }

    async fn close(self) {
        self.state.lock().unwrap().closed += 1;
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that returns its input unchanged.
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        match self.error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(html.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// One recorded extraction call.
#[derive(Debug, Clone)]
pub struct RecordedExtraction {
    pub content: String,
    pub url: String,
    pub model: String,
    pub api_key: String,
}

/// Mock extractor: queued responses first, then the default value.
#[derive(Clone)]
pub struct MockExtractor {
    responses: Arc<Mutex<VecDeque<Result<Value, AppError>>>>,
    default: Value,
    calls: Arc<Mutex<Vec<RecordedExtraction>>>,
}

impl MockExtractor {
    pub fn new(value: Value) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default: value,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        let extractor = Self::new(Value::Null);
        extractor.responses.lock().unwrap().push_back(Err(error));
        extractor
    }

    pub fn calls(&self) -> Vec<RecordedExtraction> {
        self.calls.lock().unwrap().clone()
    }
}

impl Extractor for MockExtractor {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<Value, AppError> {
        self.calls.lock().unwrap().push(RecordedExtraction {
            content: request.content.to_string(),
            url: request.url.to_string(),
            model: request.model.to_string(),
            api_key: request.api_key.to_string(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock page parser: returns a fixed value and records the markup it saw.
#[derive(Clone)]
pub struct MockParser {
    value: Value,
    error: Arc<Mutex<Option<AppError>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockParser {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            error: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_with(&self, error: AppError) {
        *self.error.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageParser for MockParser {
    fn parse(&self, html: &str) -> Result<Value, AppError> {
        self.calls.lock().unwrap().push(html.to_string());
        match self.error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(self.value.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockBroker
// ---------------------------------------------------------------------------

struct StoredMessage {
    id: i64,
    queue: String,
    payload: Value,
    holder: Option<String>,
    delivery_count: u32,
}

#[derive(Default)]
struct BrokerState {
    next_id: i64,
    messages: Vec<StoredMessage>,
    published: Vec<(String, Value)>,
    acked: Vec<i64>,
    nacked: Vec<(i64, bool)>,
    publish_error: Option<AppError>,
}

/// In-memory broker with the same delivery semantics as the SQL one.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publish(&self, error: AppError) {
        self.state.lock().unwrap().publish_error = Some(error);
    }

    /// Every payload ever published to `queue`, in order.
    pub fn published(&self, queue: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.queue == queue && m.holder.is_none())
            .count()
    }

    pub fn acked(&self) -> Vec<i64> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn nacked(&self) -> Vec<(i64, bool)> {
        self.state.lock().unwrap().nacked.clone()
    }
}

impl Broker for MockBroker {
    async fn publish(&self, queue: &str, payload: &Value) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.publish_error.take() {
            return Err(e);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.published.push((queue.to_string(), payload.clone()));
        state.messages.push(StoredMessage {
            id,
            queue: queue.to_string(),
            payload: payload.clone(),
            holder: None,
            delivery_count: 0,
        });
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, AppError> {
        let mut state = self.state.lock().unwrap();
        let deliveries = state
            .messages
            .iter_mut()
            .filter(|m| m.queue == queue && m.holder.is_none())
            .take(max)
            .map(|m| {
                m.holder = Some(consumer.to_string());
                m.delivery_count += 1;
                Delivery {
                    id: m.id,
                    queue: m.queue.clone(),
                    payload: m.payload.clone(),
                    delivery_count: m.delivery_count,
                }
            })
            .collect();
        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.messages.retain(|m| m.id != delivery_id);
        state.acked.push(delivery_id);
        Ok(())
    }

    async fn nack(&self, delivery_id: i64, requeue: bool) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.nacked.push((delivery_id, requeue));
        if requeue {
            if let Some(m) = state.messages.iter_mut().find(|m| m.id == delivery_id) {
                m.holder = None;
            }
        } else {
            state.messages.retain(|m| m.id != delivery_id);
        }
        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut recovered = 0;
        for m in state
            .messages
            .iter_mut()
            .filter(|m| m.queue == queue && m.holder.as_deref() == Some(consumer))
        {
            m.holder = None;
            recovered += 1;
        }
        Ok(recovered)
    }
}

// ---------------------------------------------------------------------------
// MemoryProductStore
// ---------------------------------------------------------------------------

/// Product store keyed by natural key, unique on `id_product`.
#[derive(Clone, Default)]
pub struct MemoryProductStore {
    products: Arc<Mutex<BTreeMap<String, Product>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: AppError) {
        *self.error.lock().unwrap() = Some(error);
    }
}

impl ProductStore for MemoryProductStore {
    async fn insert_product(&self, product: &NewProduct) -> Result<InsertOutcome, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let mut products = self.products.lock().unwrap();
        if products.contains_key(&product.id_product_smi) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        if products.values().any(|p| p.id_product == product.id_product) {
            return Err(AppError::UniqueViolation);
        }
        products.insert(
            product.id_product_smi.clone(),
            Product {
                id_product: product.id_product.clone(),
                id_product_smi: product.id_product_smi.clone(),
                offer_id: product.offer_id,
                url: product.url.clone(),
                product_name: product.product_name.clone(),
                color: product.color.clone(),
                category: product.category.clone(),
                subcategory: product.subcategory.clone(),
                description: product.description.clone(),
                price: product.price.clone(),
                currency: product.currency.clone(),
                availability: product.availability,
                keywords: product.keywords.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn get_by_natural_key(&self, natural_key: &str) -> Result<Option<Product>, AppError> {
        Ok(self.products.lock().unwrap().get(natural_key).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// Failure ledger over a map, applying the shared ledger policy.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    records: Arc<Mutex<BTreeMap<String, FailedRecord>>>,
    products: Arc<Mutex<HashSet<String>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a product with this natural key exists, for reconciliation.
    pub fn mark_product_exists(&self, natural_key: &str) {
        self.products
            .lock()
            .unwrap()
            .insert(natural_key.to_string());
    }

    pub fn fail_with(&self, error: AppError) {
        *self.error.lock().unwrap() = Some(error);
    }

    pub fn records(&self) -> Vec<FailedRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

impl FailureLedger for MemoryLedger {
    async fn record_failure(&self, failure: &NewFailure) -> Result<FailedRecord, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let record = apply_failure(records.get(&failure.natural_key), failure, Utc::now());
        records.insert(record.natural_key.clone(), record.clone());
        Ok(record)
    }

    async fn get_failure(&self, natural_key: &str) -> Result<Option<FailedRecord>, AppError> {
        Ok(self.records.lock().unwrap().get(natural_key).cloned())
    }

    async fn mark_resolved(&self) -> Result<u64, AppError> {
        let products = self.products.lock().unwrap().clone();
        let mut resolved = 0;
        for record in self.records.lock().unwrap().values_mut() {
            if !record.resolved && products.contains(&record.natural_key) {
                record.resolved = true;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn apply_ignore_policy(&self) -> Result<u64, AppError> {
        let mut ignored = 0;
        for record in self.records.lock().unwrap().values_mut() {
            if should_ignore(record) {
                record.ignore = true;
                ignored += 1;
            }
        }
        Ok(ignored)
    }

    async fn retry_candidates(
        &self,
        denied_offer_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<RetryCandidate>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| is_retry_candidate(r, denied_offer_ids))
            .take(limit)
            .map(RetryCandidate::from)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryInvalidStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryInvalidStore {
    records: Arc<Mutex<Vec<InvalidRecord>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MemoryInvalidStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: AppError) {
        *self.error.lock().unwrap() = Some(error);
    }
}

impl InvalidStore for MemoryInvalidStore {
    async fn record_invalid(&self, invalid: &NewInvalid) -> Result<(), AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let exists = records
            .iter()
            .any(|r| r.natural_key == invalid.natural_key && r.offer_id == invalid.offer_id);
        if !exists {
            records.push(InvalidRecord {
                natural_key: invalid.natural_key.clone(),
                offer_id: invalid.offer_id,
                url: invalid.url.clone(),
                reason: invalid.reason.clone(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn list_invalid(&self, natural_key: &str) -> Result<Vec<InvalidRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.natural_key == natural_key)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockHandler
// ---------------------------------------------------------------------------

type Predicate<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;

/// Records handled messages and tracks how many ran at once.
pub struct MockHandler<M> {
    handled: Arc<Mutex<Vec<M>>>,
    fail_when: Option<Predicate<M>>,
    delay_when: Option<(Predicate<M>, Duration)>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for MockHandler<M> {
    fn clone(&self) -> Self {
        Self {
            handled: Arc::clone(&self.handled),
            fail_when: self.fail_when.clone(),
            delay_when: self.delay_when.clone(),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
            _message: PhantomData,
        }
    }
}

impl<M: Clone> MockHandler<M> {
    pub fn new() -> Self {
        Self {
            handled: Arc::new(Mutex::new(Vec::new())),
            fail_when: None,
            delay_when: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            _message: PhantomData,
        }
    }

    pub fn fail_when(mut self, predicate: impl Fn(&M) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Arc::new(predicate));
        self
    }

    pub fn delay_when(
        mut self,
        predicate: impl Fn(&M) -> bool + Send + Sync + 'static,
        delay: Duration,
    ) -> Self {
        self.delay_when = Some((Arc::new(predicate), delay));
        self
    }

    pub fn handled(&self) -> Vec<M> {
        self.handled.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl<M> MessageHandler for MockHandler<M>
where
    M: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Message = M;

    async fn handle(&self, message: M) -> Result<(), AppError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some((predicate, delay)) = &self.delay_when {
            if predicate(&message) {
                tokio::time::sleep(*delay).await;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = self.fail_when.as_ref().is_some_and(|p| p(&message));
        self.handled.lock().unwrap().push(message);
        if fail {
            return Err(AppError::Generic("handler failed".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records the kind of every consumer event.
#[derive(Default)]
pub struct MockReporter {
    events: Mutex<Vec<&'static str>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == kind)
            .count()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.count(kind) > 0
    }
}

impl ConsumerReporter for MockReporter {
    fn report(&self, event: ConsumerEvent<'_>) {
        let kind = match event {
            ConsumerEvent::Started { .. } => "started",
            ConsumerEvent::Received { .. } => "received",
            ConsumerEvent::QueueEmpty { .. } => "queue_empty",
            ConsumerEvent::QuotaArmed { .. } => "quota_armed",
            ConsumerEvent::QuotaReset { .. } => "quota_reset",
            ConsumerEvent::CredentialRotated { .. } => "credential_rotated",
            ConsumerEvent::QuotaExhausted { .. } => "quota_exhausted",
            ConsumerEvent::BatchStarted { .. } => "batch_started",
            ConsumerEvent::BatchRejected { .. } => "batch_rejected",
            ConsumerEvent::ItemAcked { .. } => "item_acked",
            ConsumerEvent::ItemFailed { .. } => "item_failed",
            ConsumerEvent::BatchFinished { .. } => "batch_finished",
            ConsumerEvent::BrokerFault { .. } => "broker_fault",
            ConsumerEvent::ShuttingDown { .. } => "shutting_down",
            ConsumerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(kind);
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to. Starts at 2026-01-14 12:00 UTC.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 14, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

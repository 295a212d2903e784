use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Delivery};
use crate::config::QueueConfig;
use crate::error::AppError;
use crate::quota::{Admission, Clock, CredentialRing, QuotaState};

/// Processes one decoded queue message.
///
/// `Ok` acknowledges the message. `Err` returns it to the queue for
/// redelivery, so per-item failures that are already bookkept must be
/// swallowed by the handler.
pub trait MessageHandler: Send + Sync + Clone {
    type Message: DeserializeOwned + Send;

    fn handle(&self, message: Self::Message) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Events emitted by a queue consumer for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ConsumerEvent<'a> {
    Started {
        queue: &'a str,
        consumer: &'a str,
    },
    Received {
        queue: &'a str,
        delivery_id: i64,
        delivery_count: u32,
    },
    QueueEmpty {
        queue: &'a str,
    },
    QuotaArmed {
        queue: &'a str,
        reset_at: DateTime<Utc>,
    },
    QuotaReset {
        queue: &'a str,
        next_reset: DateTime<Utc>,
    },
    CredentialRotated {
        queue: &'a str,
        credential_index: usize,
    },
    QuotaExhausted {
        queue: &'a str,
        reset_at: Option<DateTime<Utc>>,
    },
    BatchStarted {
        queue: &'a str,
        size: usize,
        consumed: Option<u32>,
    },
    BatchRejected {
        queue: &'a str,
        size: usize,
        error: &'a str,
    },
    ItemAcked {
        queue: &'a str,
        delivery_id: i64,
    },
    ItemFailed {
        queue: &'a str,
        delivery_id: i64,
        error: &'a str,
    },
    BatchFinished {
        queue: &'a str,
        acked: usize,
        failed: usize,
    },
    BrokerFault {
        queue: &'a str,
        error: &'a str,
    },
    ShuttingDown {
        queue: &'a str,
        requeued: usize,
    },
    Stopped {
        queue: &'a str,
    },
}

/// Trait for receiving consumer events (decoupled logging).
pub trait ConsumerReporter: Send + Sync {
    fn report(&self, event: ConsumerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsumerReporter;

impl ConsumerReporter for TracingConsumerReporter {
    fn report(&self, event: ConsumerEvent<'_>) {
        match event {
            ConsumerEvent::Started { queue, consumer } => {
                tracing::info!(%queue, %consumer, "Consumer started");
            }
            ConsumerEvent::Received {
                queue,
                delivery_id,
                delivery_count,
            } => {
                tracing::debug!(%queue, %delivery_id, %delivery_count, "Received message");
            }
            ConsumerEvent::QueueEmpty { queue } => {
                tracing::info!(%queue, "Queue is empty, waiting for new messages");
            }
            ConsumerEvent::QuotaArmed { queue, reset_at } => {
                tracing::info!(%queue, %reset_at, "Daily quota reset scheduled");
            }
            ConsumerEvent::QuotaReset { queue, next_reset } => {
                tracing::info!(%queue, %next_reset, "Daily quota reset");
            }
            ConsumerEvent::CredentialRotated {
                queue,
                credential_index,
            } => {
                tracing::warn!(%queue, %credential_index, "Daily limit reached, switched credential");
            }
            ConsumerEvent::QuotaExhausted { queue, reset_at } => {
                tracing::warn!(%queue, ?reset_at, "All credentials exhausted, pausing until reset");
            }
            ConsumerEvent::BatchStarted {
                queue,
                size,
                consumed,
            } => {
                tracing::info!(%queue, %size, ?consumed, "Processing batch");
            }
            ConsumerEvent::BatchRejected { queue, size, error } => {
                tracing::error!(%queue, %size, %error, "Batch could not be decoded, requeued");
            }
            ConsumerEvent::ItemAcked { queue, delivery_id } => {
                tracing::debug!(%queue, %delivery_id, "Acknowledged message");
            }
            ConsumerEvent::ItemFailed {
                queue,
                delivery_id,
                error,
            } => {
                tracing::warn!(%queue, %delivery_id, %error, "Message failed, requeued");
            }
            ConsumerEvent::BatchFinished {
                queue,
                acked,
                failed,
            } => {
                tracing::info!(%queue, %acked, %failed, "Batch finished");
            }
            ConsumerEvent::BrokerFault { queue, error } => {
                tracing::error!(%queue, %error, "Broker operation failed");
            }
            ConsumerEvent::ShuttingDown { queue, requeued } => {
                tracing::info!(%queue, %requeued, "Consumer shutting down");
            }
            ConsumerEvent::Stopped { queue } => {
                tracing::info!(%queue, "Consumer stopped");
            }
        }
    }
}

/// What the consumption loop is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    Idle,
    Filling,
    Draining,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A batch was dispatched and settled.
    Dispatched { acked: usize, failed: usize },
    /// Nothing to do: the buffer is empty or the broker is unavailable.
    Idle,
    /// Messages are buffered but the quota holds them back.
    Held,
}

/// Mutable state of one queue, owned by its consumption loop.
#[derive(Debug)]
pub struct QueueState {
    buffer: VecDeque<Delivery>,
    quota: Option<QuotaState>,
    phase: QueuePhase,
    empty_notice_shown: bool,
}

impl QueueState {
    pub fn new(config: &QueueConfig, credentials: Vec<String>) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.batch_size),
            quota: config
                .daily_limit
                .map(|limit| QuotaState::new(limit, CredentialRing::new(credentials))),
            phase: QueuePhase::Idle,
            empty_notice_shown: false,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn quota(&self) -> Option<&QuotaState> {
        self.quota.as_ref()
    }

    pub fn phase(&self) -> QueuePhase {
        self.phase
    }
}

/// Consumes one queue in batches.
///
/// At most one batch is in flight; the messages of a batch are handled
/// concurrently and all of them are settled (ack or nack) before the next
/// batch is pulled.
pub struct QueueConsumer<B, H, C>
where
    B: Broker,
    H: MessageHandler,
    C: Clock,
{
    broker: B,
    handler: H,
    clock: C,
    config: QueueConfig,
    credentials: Vec<String>,
    consumer_tag: String,
}

impl<B, H, C> QueueConsumer<B, H, C>
where
    B: Broker,
    H: MessageHandler,
    C: Clock,
{
    pub fn new(broker: B, handler: H, clock: C, config: QueueConfig) -> Self {
        let consumer_tag = format!("{}-{}", config.name, uuid::Uuid::new_v4());
        Self {
            broker,
            handler,
            clock,
            config,
            credentials: Vec::new(),
            consumer_tag,
        }
    }

    /// Credentials rotated through when the queue has a daily limit.
    pub fn with_credentials(mut self, credentials: Vec<String>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn queue(&self) -> &str {
        &self.config.name
    }

    pub fn new_state(&self) -> QueueState {
        QueueState::new(&self.config, self.credentials.clone())
    }

    /// Run the consumption loop until cancellation.
    ///
    /// Messages still buffered on shutdown are returned to the queue.
    pub async fn run<R: ConsumerReporter>(&self, cancel_token: CancellationToken, reporter: &R) {
        let queue = self.config.name.as_str();
        reporter.report(ConsumerEvent::Started {
            queue,
            consumer: &self.consumer_tag,
        });

        let mut state = self.new_state();
        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let wait = match self.tick(&mut state, reporter).await {
                Tick::Dispatched { .. } => self.config.batch_delay,
                Tick::Idle | Tick::Held => self.config.poll_interval,
            };

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        let requeued = self.release_buffer(&mut state).await;
        reporter.report(ConsumerEvent::ShuttingDown { queue, requeued });
        reporter.report(ConsumerEvent::Stopped { queue });
    }

    /// One iteration: apply due resets, top up the buffer, then dispatch a
    /// batch if the quota allows it.
    pub async fn tick<R: ConsumerReporter>(&self, state: &mut QueueState, reporter: &R) -> Tick {
        let queue = self.config.name.as_str();

        if let Some(quota) = state.quota.as_mut() {
            if let Some(next_reset) = quota.reset_if_due(self.clock.now()) {
                reporter.report(ConsumerEvent::QuotaReset { queue, next_reset });
            }
        }

        state.phase = QueuePhase::Filling;
        let room = self.config.batch_size.saturating_sub(state.buffer.len());
        if room > 0 {
            match self
                .broker
                .receive(queue, &self.consumer_tag, room)
                .await
            {
                Ok(deliveries) => {
                    if !deliveries.is_empty() {
                        state.empty_notice_shown = false;
                        if let Some(quota) = state.quota.as_mut() {
                            if let Some(reset_at) = quota.arm(self.clock.now()) {
                                reporter.report(ConsumerEvent::QuotaArmed { queue, reset_at });
                            }
                        }
                    }
                    for delivery in deliveries {
                        reporter.report(ConsumerEvent::Received {
                            queue,
                            delivery_id: delivery.id,
                            delivery_count: delivery.delivery_count,
                        });
                        state.buffer.push_back(delivery);
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(ConsumerEvent::BrokerFault {
                        queue,
                        error: &error,
                    });
                }
            }
        }

        if state.buffer.is_empty() {
            state.phase = QueuePhase::Idle;
            if !state.empty_notice_shown {
                reporter.report(ConsumerEvent::QueueEmpty { queue });
                state.empty_notice_shown = true;
            }
            return Tick::Idle;
        }

        let mut take = self.config.batch_size.min(state.buffer.len());
        if let Some(quota) = state.quota.as_ref() {
            // One batch never spans more than a single credential's allowance.
            take = take.min(usize::try_from(quota.daily_limit()).unwrap_or(usize::MAX));
        }
        let api_key = match state.quota.as_mut() {
            None => None,
            Some(quota) => match quota.admit(take) {
                Admission::Proceed => quota.active_credential().map(String::from),
                Admission::Rotated { credential_index } => {
                    reporter.report(ConsumerEvent::CredentialRotated {
                        queue,
                        credential_index,
                    });
                    quota.active_credential().map(String::from)
                }
                Admission::Exhausted { first_notice } => {
                    if first_notice {
                        reporter.report(ConsumerEvent::QuotaExhausted {
                            queue,
                            reset_at: quota.reset_at(),
                        });
                    }
                    state.phase = QueuePhase::Idle;
                    return Tick::Held;
                }
            },
        };

        state.phase = QueuePhase::Draining;
        let batch: Vec<Delivery> = state.buffer.drain(..take).collect();
        if let Some(quota) = state.quota.as_mut() {
            quota.record(batch.len());
        }
        reporter.report(ConsumerEvent::BatchStarted {
            queue,
            size: batch.len(),
            consumed: state.quota.as_ref().map(QuotaState::consumed),
        });

        let tick = self.dispatch(batch, api_key.as_deref(), reporter).await;
        state.phase = QueuePhase::Idle;
        tick
    }

    async fn dispatch<R: ConsumerReporter>(
        &self,
        batch: Vec<Delivery>,
        api_key: Option<&str>,
        reporter: &R,
    ) -> Tick {
        let queue = self.config.name.as_str();

        let decoded: Result<Vec<H::Message>, AppError> = batch
            .iter()
            .map(|delivery| decode::<H::Message>(delivery, api_key))
            .collect();
        let messages = match decoded {
            Ok(messages) => messages,
            Err(e) => {
                let error = e.to_string();
                reporter.report(ConsumerEvent::BatchRejected {
                    queue,
                    size: batch.len(),
                    error: &error,
                });
                for delivery in &batch {
                    self.settle(delivery.id, false).await;
                }
                return Tick::Dispatched {
                    acked: 0,
                    failed: batch.len(),
                };
            }
        };

        let item_timeout = self.config.item_timeout;
        let results = join_all(messages.into_iter().map(|message| async move {
            match tokio::time::timeout(item_timeout, self.handler.handle(message)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(item_timeout.as_millis() as u64)),
            }
        }))
        .await;

        let mut acked = 0;
        let mut failed = 0;
        for (delivery, result) in batch.iter().zip(results) {
            match result {
                Ok(()) => {
                    self.settle(delivery.id, true).await;
                    reporter.report(ConsumerEvent::ItemAcked {
                        queue,
                        delivery_id: delivery.id,
                    });
                    acked += 1;
                }
                Err(e) => {
                    self.settle(delivery.id, false).await;
                    let error = e.to_string();
                    reporter.report(ConsumerEvent::ItemFailed {
                        queue,
                        delivery_id: delivery.id,
                        error: &error,
                    });
                    failed += 1;
                }
            }
        }

        reporter.report(ConsumerEvent::BatchFinished {
            queue,
            acked,
            failed,
        });
        Tick::Dispatched { acked, failed }
    }

    /// Ack on success, nack with requeue otherwise.
    async fn settle(&self, delivery_id: i64, success: bool) {
        let result = if success {
            self.broker.ack(delivery_id).await
        } else {
            self.broker.nack(delivery_id, true).await
        };
        if let Err(e) = result {
            tracing::error!(queue = %self.config.name, %delivery_id, error = %e, "Failed to settle message");
        }
    }

    async fn release_buffer(&self, state: &mut QueueState) -> usize {
        let mut requeued = 0;
        for delivery in state.buffer.drain(..) {
            match self.broker.nack(delivery.id, true).await {
                Ok(()) => requeued += 1,
                Err(e) => {
                    tracing::error!(queue = %self.config.name, delivery_id = %delivery.id, error = %e, "Failed to requeue buffered message");
                }
            }
        }
        state.phase = QueuePhase::Idle;
        requeued
    }
}

fn decode<M: DeserializeOwned>(delivery: &Delivery, api_key: Option<&str>) -> Result<M, AppError> {
    let mut payload = delivery.payload.clone();
    if let (Some(key), Some(object)) = (api_key, payload.as_object_mut()) {
        object.insert("api_key".into(), serde_json::Value::String(key.to_string()));
    }
    Ok(serde_json::from_value(payload)?)
}

/// Runs several queue consumers concurrently under one cancellation token.
pub struct ConsumerGroup {
    cancel_token: CancellationToken,
    tasks: JoinSet<String>,
}

impl ConsumerGroup {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<B, H, C, R>(&mut self, consumer: QueueConsumer<B, H, C>, reporter: Arc<R>)
    where
        B: Broker + 'static,
        H: MessageHandler + 'static,
        C: Clock + 'static,
        R: ConsumerReporter + 'static,
    {
        let cancel_token = self.cancel_token.clone();
        self.tasks.spawn(async move {
            consumer.run(cancel_token, reporter.as_ref()).await;
            consumer.queue().to_string()
        });
    }

    /// Wait for every consumer to stop. A panicking consumer cancels the rest.
    pub async fn join(mut self) -> Result<(), AppError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(queue) => tracing::debug!(%queue, "Consumer task finished"),
                Err(e) => {
                    self.cancel_token.cancel();
                    first_error.get_or_insert(AppError::Generic(format!(
                        "Consumer task failed: {e}"
                    )));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

use std::future::Future;

use crate::error::AppError;

/// A message handed to a consumer and awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub queue: String,
    pub payload: serde_json::Value,
    /// How many times this message has been delivered, this delivery included.
    pub delivery_count: u32,
}

/// At-least-once message broker with manual acknowledgment.
///
/// A delivered message stays invisible to other consumers until it is
/// acknowledged (removed) or negatively acknowledged (returned or dropped).
/// Implementations must hand out each ready message to exactly one consumer
/// per delivery, e.g. via `SELECT FOR UPDATE SKIP LOCKED`.
pub trait Broker: Send + Sync + Clone {
    fn publish(
        &self,
        queue: &str,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Deliver up to `max` ready messages from `queue` to `consumer`.
    fn receive(
        &self,
        queue: &str,
        consumer: &str,
        max: usize,
    ) -> impl Future<Output = Result<Vec<Delivery>, AppError>> + Send;

    fn ack(&self, delivery_id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Return the message to the queue (`requeue`) or drop it.
    fn nack(
        &self,
        delivery_id: i64,
        requeue: bool,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Make every unacknowledged delivery held by `consumer` ready again.
    fn recover(
        &self,
        queue: &str,
        consumer: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

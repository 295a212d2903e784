//! Per-queue daily quota with credential rotation.
//!
//! A quota-bearing queue may dispatch at most `daily_limit` items under one
//! credential. When the next batch would cross the limit the queue rotates to
//! the next credential and starts counting again; once the rotation wraps
//! around to the first credential the queue is exhausted until the daily reset.
//! The reset instant is armed by the first delivery and recurs at the same
//! local wall-clock time every following day.

use chrono::{DateTime, Days, Local, Utc};

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Same local wall-clock time, one calendar day after `from`.
pub fn next_reset(from: DateTime<Utc>) -> DateTime<Utc> {
    from.with_timezone(&Local)
        .checked_add_days(Days::new(1))
        .map(|next| next.with_timezone(&Utc))
        .unwrap_or_else(|| from + chrono::Duration::days(1))
}

/// Fixed list of API credentials with a cursor on the active one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRing {
    keys: Vec<String>,
    index: usize,
}

impl CredentialRing {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys, index: 0 }
    }

    pub fn active(&self) -> Option<&str> {
        self.keys.get(self.index).map(String::as_str)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Move to the next credential. Returns `true` when the cursor wrapped
    /// back to the first one (every credential has been used).
    fn advance(&mut self) -> bool {
        if self.keys.is_empty() {
            return true;
        }
        self.index = (self.index + 1) % self.keys.len();
        self.index == 0
    }
}

/// Where the queue stands in the rotation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// Consuming under the credential active since the last reset.
    Open,
    /// Moved to a later credential after the previous one hit the limit.
    Rotated,
    /// Every credential hit the limit; nothing is dispatched until reset.
    Exhausted,
}

/// Decision for the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch under the active credential.
    Proceed,
    /// The previous credential hit the limit; dispatch under the new one.
    Rotated { credential_index: usize },
    /// Hold until reset. `first_notice` is set only on the transition.
    Exhausted { first_notice: bool },
}

/// Quota counters owned by one queue's consumption loop.
#[derive(Debug, Clone)]
pub struct QuotaState {
    daily_limit: u32,
    consumed: u32,
    reset_at: Option<DateTime<Utc>>,
    credentials: CredentialRing,
    rotation: RotationState,
}

impl QuotaState {
    pub fn new(daily_limit: u32, credentials: CredentialRing) -> Self {
        Self {
            daily_limit,
            consumed: 0,
            reset_at: None,
            credentials,
            rotation: RotationState::Open,
        }
    }

    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_at
    }

    pub fn active_credential(&self) -> Option<&str> {
        self.credentials.active()
    }

    pub fn credential_index(&self) -> usize {
        self.credentials.index()
    }

    /// Schedule the first reset. Returns the instant when this call armed it.
    pub fn arm(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.reset_at.is_some() {
            return None;
        }
        let at = next_reset(now);
        self.reset_at = Some(at);
        Some(at)
    }

    /// Apply every reset that fell due by `now`. Returns the next reset
    /// instant if at least one reset happened.
    pub fn reset_if_due(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut fired = false;
        while let Some(at) = self.reset_at {
            if now < at {
                break;
            }
            self.reset_at = Some(next_reset(at));
            fired = true;
        }
        if !fired {
            return None;
        }
        self.consumed = 0;
        self.rotation = RotationState::Open;
        self.reset_at
    }

    /// Decide whether `take` more items may be dispatched.
    ///
    /// Callers keep `take <= daily_limit`, so a freshly rotated credential
    /// always admits the batch that triggered the rotation.
    pub fn admit(&mut self, take: usize) -> Admission {
        if self.rotation == RotationState::Exhausted {
            return Admission::Exhausted {
                first_notice: false,
            };
        }
        let take = u32::try_from(take).unwrap_or(u32::MAX);
        if self.consumed.saturating_add(take) <= self.daily_limit {
            return Admission::Proceed;
        }

        if self.credentials.advance() {
            self.rotation = RotationState::Exhausted;
            return Admission::Exhausted { first_notice: true };
        }
        self.consumed = 0;
        self.rotation = RotationState::Rotated;
        Admission::Rotated {
            credential_index: self.credentials.index(),
        }
    }

    /// Count dispatched items against the active credential.
    pub fn record(&mut self, dispatched: usize) {
        let dispatched = u32::try_from(dispatched).unwrap_or(u32::MAX);
        self.consumed = self.consumed.saturating_add(dispatched);
    }
}

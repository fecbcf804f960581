//! Work dispatch: how job notifications travel from the manager to the
//! worker fleet.
//!
//! Two transport profiles share one seam. The broker profile publishes
//! envelopes to per-priority queues on NATS JetStream and workers consume
//! with prefetch 1, acking only after completion. The polling profile skips
//! the broker entirely; workers hit the claim endpoint on an interval. The
//! manager holds a [`JobPublisher`], the worker a [`JobSource`]; config
//! picks the drivers.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Task type tag carried in broker message headers.
pub const TASK_TYPE: &str = "job:process";

/// Delivery retries before a job notification is dropped by the broker.
pub const MAX_DELIVERIES: i64 = 4;

/// How long the broker retains unconsumed notifications.
pub const RETENTION: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Ack window per delivery; longer than the 30-minute per-task budget so a
/// slow job is not redelivered while still being worked.
pub const ACK_WAIT: std::time::Duration = std::time::Duration::from_secs(35 * 60);

/// The notification published when a job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// Priority bands, each its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Critical,
    High,
    Default,
    Low,
}

impl Queue {
    pub const ALL: [Queue; 4] = [Queue::Critical, Queue::High, Queue::Default, Queue::Low];

    /// Band mapping: ≥ 10 critical, 5..9 high, 0..4 default, < 0 low.
    pub fn for_priority(priority: i32) -> Self {
        if priority >= 10 {
            Self::Critical
        } else if priority >= 5 {
            Self::High
        } else if priority >= 0 {
            Self::Default
        } else {
            Self::Low
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Default => "default",
            Self::Low => "low",
        }
    }

    /// Consumption weight: higher queues are drained preferentially.
    pub fn weight(&self) -> usize {
        match self {
            Self::Critical => 6,
            Self::High => 3,
            Self::Default => 2,
            Self::Low => 1,
        }
    }

    pub fn subject(&self) -> String {
        format!("jobs.{}", self.name())
    }
}

/// Weighted visiting order over the four queues.
///
/// One cycle visits each queue as many times as its weight, interleaved so
/// no queue waits longer than one full cycle (the anti-starvation bound:
/// each lower-weight queue is seen at least once every sum-of-higher-weights
/// batches).
#[derive(Debug, Clone)]
pub struct WeightedRotation {
    schedule: Vec<Queue>,
    cursor: usize,
}

impl WeightedRotation {
    pub fn new() -> Self {
        let max_weight = Queue::ALL.iter().map(|q| q.weight()).max().unwrap_or(1);
        let mut schedule = Vec::new();
        for round in 0..max_weight {
            for queue in Queue::ALL {
                if queue.weight() > round {
                    schedule.push(queue);
                }
            }
        }
        Self { schedule, cursor: 0 }
    }

    /// The next queue to poll.
    pub fn next(&mut self) -> Queue {
        let queue = self.schedule[self.cursor % self.schedule.len()];
        self.cursor += 1;
        queue
    }

    /// Length of one full cycle.
    pub fn cycle_len(&self) -> usize {
        self.schedule.len()
    }
}

impl Default for WeightedRotation {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager side: publish a notification for a freshly created job.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Returns whether the envelope was actually handed to a broker. The
    /// polling-profile publisher succeeds without publishing anything, and
    /// its jobs must stay `pending` for claim polls to find them.
    async fn publish(&self, envelope: &JobEnvelope) -> Result<bool>;
}

/// Publisher for polling-profile deployments: workers find jobs by
/// claiming, so creation publishes nothing.
pub struct NoopPublisher;

#[async_trait]
impl JobPublisher for NoopPublisher {
    async fn publish(&self, _envelope: &JobEnvelope) -> Result<bool> {
        Ok(false)
    }
}

/// Completion signal for a delivery. Ack removes the notification; nack
/// returns it to the queue for redelivery.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
    async fn nack(self: Box<Self>) -> Result<()>;
}

/// One received job notification plus its completion handle.
pub struct Delivery {
    pub envelope: JobEnvelope,
    pub acker: Box<dyn Acker>,
}

/// Worker side: blocking-ish source of deliveries.
#[async_trait]
pub trait JobSource: Send {
    /// Fetch the next delivery, visiting queues in weighted order. `None`
    /// means every queue came up empty this cycle.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

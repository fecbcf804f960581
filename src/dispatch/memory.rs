//! In-memory broker double.
//!
//! Mirrors the JetStream driver's semantics closely enough for tests and
//! single-process development: per-priority queues, weighted consumption,
//! and nack-requeues-at-the-front redelivery.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dispatch::{Acker, Delivery, JobEnvelope, JobPublisher, JobSource, Queue, WeightedRotation};
use crate::error::Result;

type Queues = Arc<Mutex<HashMap<Queue, VecDeque<JobEnvelope>>>>;

/// Shared in-process queue set. Clone freely; all clones see one state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Queues,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a consuming handle onto these queues.
    pub fn source(&self) -> MemorySource {
        MemorySource {
            queues: self.queues.clone(),
            rotation: WeightedRotation::new(),
        }
    }

    /// Outstanding notifications in one queue, for assertions.
    pub fn depth(&self, queue: Queue) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&queue)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl JobPublisher for MemoryBroker {
    async fn publish(&self, envelope: &JobEnvelope) -> Result<bool> {
        let queue = Queue::for_priority(envelope.priority);
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(queue)
            .or_default()
            .push_back(envelope.clone());
        Ok(true)
    }
}

/// Consuming side of [`MemoryBroker`].
pub struct MemorySource {
    queues: Queues,
    rotation: WeightedRotation,
}

#[async_trait]
impl JobSource for MemorySource {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        for _ in 0..self.rotation.cycle_len() {
            let queue = self.rotation.next();
            let envelope = self
                .queues
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_mut(&queue)
                .and_then(VecDeque::pop_front);
            if let Some(envelope) = envelope {
                return Ok(Some(Delivery {
                    acker: Box::new(MemoryAcker {
                        queues: self.queues.clone(),
                        queue,
                        envelope: envelope.clone(),
                    }),
                    envelope,
                }));
            }
        }
        Ok(None)
    }
}

struct MemoryAcker {
    queues: Queues,
    queue: Queue,
    envelope: JobEnvelope,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        let MemoryAcker {
            queues,
            queue,
            envelope,
        } = *self;
        queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(queue)
            .or_default()
            .push_front(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(priority: i32) -> JobEnvelope {
        JobEnvelope {
            job_id: Uuid::new_v4(),
            priority,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn routes_by_priority_band() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope(12)).await.unwrap();
        broker.publish(&envelope(7)).await.unwrap();
        broker.publish(&envelope(2)).await.unwrap();
        broker.publish(&envelope(-3)).await.unwrap();

        assert_eq!(broker.depth(Queue::Critical), 1);
        assert_eq!(broker.depth(Queue::High), 1);
        assert_eq!(broker.depth(Queue::Default), 1);
        assert_eq!(broker.depth(Queue::Low), 1);
    }

    #[tokio::test]
    async fn critical_drains_before_low() {
        let broker = MemoryBroker::new();
        let low = envelope(-1);
        let critical = envelope(20);
        broker.publish(&low).await.unwrap();
        broker.publish(&critical).await.unwrap();

        let mut source = broker.source();
        let first = source.next().await.unwrap().unwrap();
        assert_eq!(first.envelope.job_id, critical.job_id);
        first.acker.ack().await.unwrap();

        let second = source.next().await.unwrap().unwrap();
        assert_eq!(second.envelope.job_id, low.job_id);
    }

    #[tokio::test]
    async fn nack_redelivers() {
        let broker = MemoryBroker::new();
        let env = envelope(0);
        broker.publish(&env).await.unwrap();

        let mut source = broker.source();
        let delivery = source.next().await.unwrap().unwrap();
        delivery.acker.nack().await.unwrap();

        let redelivered = source.next().await.unwrap().unwrap();
        assert_eq!(redelivered.envelope.job_id, env.job_id);
    }

    #[tokio::test]
    async fn empty_cycle_yields_none() {
        let broker = MemoryBroker::new();
        let mut source = broker.source();
        assert!(source.next().await.unwrap().is_none());
    }
}

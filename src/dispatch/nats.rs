//! JetStream-backed dispatch driver.
//!
//! One work-queue stream carries the four priority subjects. Workers open a
//! durable pull consumer per queue and fetch one message at a time, which is
//! what bounds prefetch to a single in-flight job per worker. Acks happen
//! only after the job finished (or explicitly failed); a worker that dies
//! mid-job simply never acks, and the ack-wait expiry returns the delivery
//! to the queue.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

use crate::dispatch::{
    ACK_WAIT, Acker, Delivery, JobEnvelope, JobPublisher, JobSource, MAX_DELIVERIES, Queue,
    RETENTION, TASK_TYPE, WeightedRotation,
};
use crate::error::{Error, Result};

const STREAM_NAME: &str = "WAYPOINT_JOBS";

/// How long a single fetch waits on an empty queue before the rotation
/// moves on.
const FETCH_EXPIRES: Duration = Duration::from_millis(200);

/// Connection wrapper owning the JetStream context.
#[derive(Clone)]
pub struct NatsDispatcher {
    jetstream: jetstream::Context,
}

impl NatsDispatcher {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url).await.map_err(Error::broker)?;
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Idempotently create the work-queue stream with its retention policy.
    pub async fn ensure_stream(&self) -> Result<jetstream::stream::Stream> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_owned(),
                subjects: Queue::ALL.iter().map(Queue::subject).collect(),
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                max_age: RETENTION,
                ..Default::default()
            })
            .await
            .map_err(Error::broker)
    }
}

#[async_trait]
impl JobPublisher for NatsDispatcher {
    async fn publish(&self, envelope: &JobEnvelope) -> Result<bool> {
        let queue = Queue::for_priority(envelope.priority);
        let payload: Bytes = serde_json::to_vec(envelope).map_err(Error::broker)?.into();

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("task-type", TASK_TYPE);

        let ack = self
            .jetstream
            .publish_with_headers(queue.subject(), headers, payload)
            .await
            .map_err(Error::broker)?;
        ack.await.map_err(Error::broker)?;

        debug!(job_id = %envelope.job_id, queue = queue.name(), "published job notification");
        Ok(true)
    }
}

/// Worker-side consumer set: one durable pull consumer per priority queue,
/// visited in weighted order.
pub struct NatsJobSource {
    consumers: HashMap<Queue, PullConsumer>,
    rotation: WeightedRotation,
}

impl NatsJobSource {
    /// Open (or re-open) the durable consumers for `group`. Workers of the
    /// same group share the durables, so each delivery reaches one worker.
    pub async fn open(dispatcher: &NatsDispatcher, group: &str) -> Result<Self> {
        let stream = dispatcher.ensure_stream().await?;

        let mut consumers = HashMap::new();
        for queue in Queue::ALL {
            let durable = format!("{group}-{}", queue.name());
            let consumer = stream
                .get_or_create_consumer(
                    &durable,
                    jetstream::consumer::pull::Config {
                        durable_name: Some(durable.clone()),
                        filter_subject: queue.subject(),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        ack_wait: ACK_WAIT,
                        max_deliver: MAX_DELIVERIES,
                        ..Default::default()
                    },
                )
                .await
                .map_err(Error::broker)?;
            consumers.insert(queue, consumer);
        }

        Ok(Self {
            consumers,
            rotation: WeightedRotation::new(),
        })
    }
}

#[async_trait]
impl JobSource for NatsJobSource {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        for _ in 0..self.rotation.cycle_len() {
            let queue = self.rotation.next();
            let consumer = self
                .consumers
                .get(&queue)
                .ok_or_else(|| Error::Broker(format!("no consumer for queue {}", queue.name())))?;

            // max_messages(1) is the prefetch bound: one unacked delivery
            // per worker, never a backlog of unseen work.
            let mut batch = consumer
                .fetch()
                .max_messages(1)
                .expires(FETCH_EXPIRES)
                .messages()
                .await
                .map_err(Error::broker)?;

            if let Some(message) = batch.next().await {
                let message = message.map_err(Error::broker)?;
                let envelope: JobEnvelope =
                    serde_json::from_slice(&message.payload).map_err(Error::broker)?;
                return Ok(Some(Delivery {
                    envelope,
                    acker: Box::new(NatsAcker { message }),
                }));
            }
        }
        Ok(None)
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.message.ack().await.map_err(Error::broker)
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(Error::broker)
    }
}

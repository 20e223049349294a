// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message bus between the usecase and the task handlers.
//!
//! Two interchangeable transports carry the same envelopes:
//!
//! | Transport | Producer | Consumer |
//! |-----------|----------|----------|
//! | in-process | [`channel::ChannelProducer`] | bounded channels, capacity 10 |
//! | NSQ | [`nsq::NsqProducer`] | [`nsq::NsqConsumer`], channel `default` |
//!
//! Either way the handlers see three [`TaskQueues`] receivers. Every
//! [`Delivery`] must be acknowledged once handled; a delivery dropped without
//! an ack is handed back to the broker. Delivery is at-least-once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::task::{CreateClusterPayload, InitClusterPayload, UpdateClusterPayload};

pub mod channel;
pub mod nsq;

pub use channel::{ChannelProducer, in_process};
pub use nsq::{NsqConsumer, NsqProducer};

/// Consumer channel name on the broker.
pub const CHANNEL: &str = "default";

/// Capacity of each in-process queue.
pub const QUEUE_CAPACITY: usize = 10;

/// What travels over the bus for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope<P> {
    pub enterprise_id: String,
    pub task_id: String,
    pub payload: P,
}

impl<P> TaskEnvelope<P> {
    pub fn new(enterprise_id: &str, task_id: &str, payload: P) -> Self {
        Self {
            enterprise_id: enterprise_id.to_string(),
            task_id: task_id.to_string(),
            payload,
        }
    }
}

/// A received envelope with its acknowledgement handle.
#[derive(Debug)]
pub struct Delivery<P> {
    pub envelope: TaskEnvelope<P>,
    ack: Option<oneshot::Sender<()>>,
}

impl<P> Delivery<P> {
    /// A delivery nobody waits on.
    pub fn new(envelope: TaskEnvelope<P>) -> Self {
        Self {
            envelope,
            ack: None,
        }
    }

    /// A delivery whose ack is awaited on the returned receiver.
    pub fn with_ack(envelope: TaskEnvelope<P>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                envelope,
                ack: Some(tx),
            },
            rx,
        )
    }

    pub fn into_parts(self) -> (TaskEnvelope<P>, Acker) {
        (self.envelope, Acker(self.ack))
    }
}

/// Acknowledges a delivery. Dropping it unacked requeues the message.
#[derive(Debug)]
pub struct Acker(Option<oneshot::Sender<()>>);

impl Acker {
    pub fn ack(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Publishing side of the bus.
#[async_trait]
pub trait TaskProducer: Send + Sync {
    async fn send_create(&self, envelope: TaskEnvelope<CreateClusterPayload>) -> Result<()>;

    async fn send_init(&self, envelope: TaskEnvelope<InitClusterPayload>) -> Result<()>;

    async fn send_update(&self, envelope: TaskEnvelope<UpdateClusterPayload>) -> Result<()>;
}

/// Consuming side of the bus, one queue per task kind.
pub struct TaskQueues {
    pub create: mpsc::Receiver<Delivery<CreateClusterPayload>>,
    pub init: mpsc::Receiver<Delivery<InitClusterPayload>>,
    pub update: mpsc::Receiver<Delivery<UpdateClusterPayload>>,
}

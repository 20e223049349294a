// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Delivery, QUEUE_CAPACITY, TaskEnvelope, TaskProducer, TaskQueues};
use crate::error::{Error, Result};
use crate::task::{CreateClusterPayload, InitClusterPayload, UpdateClusterPayload};

/// Producer over three bounded channels. Sending waits while a queue is full.
#[derive(Clone)]
pub struct ChannelProducer {
    create: mpsc::Sender<Delivery<CreateClusterPayload>>,
    init: mpsc::Sender<Delivery<InitClusterPayload>>,
    update: mpsc::Sender<Delivery<UpdateClusterPayload>>,
}

/// Create a connected producer and queue set.
pub fn in_process() -> (ChannelProducer, TaskQueues) {
    let (create_tx, create_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (init_tx, init_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (update_tx, update_rx) = mpsc::channel(QUEUE_CAPACITY);
    (
        ChannelProducer {
            create: create_tx,
            init: init_tx,
            update: update_tx,
        },
        TaskQueues {
            create: create_rx,
            init: init_rx,
            update: update_rx,
        },
    )
}

async fn send<P>(
    queue: &mpsc::Sender<Delivery<P>>,
    name: &str,
    envelope: TaskEnvelope<P>,
) -> Result<()> {
    queue
        .send(Delivery::new(envelope))
        .await
        .map_err(|_| Error::Queue(format!("{} queue is closed", name)))
}

#[async_trait]
impl TaskProducer for ChannelProducer {
    async fn send_create(&self, envelope: TaskEnvelope<CreateClusterPayload>) -> Result<()> {
        send(&self.create, "create", envelope).await
    }

    async fn send_init(&self, envelope: TaskEnvelope<InitClusterPayload>) -> Result<()> {
        send(&self.init, "init", envelope).await
    }

    async fn send_update(&self, envelope: TaskEnvelope<UpdateClusterPayload>) -> Result<()> {
        send(&self.update, "update", envelope).await
    }
}

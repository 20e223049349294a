// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task handlers.
//!
//! One loop per task kind pulls deliveries off its queue and runs each task
//! on its own tokio task. The task's message stream is forwarded to the
//! [`EventSink`]; the delivery is acked once the stream is closed.
//!
//! Task ids currently running in this process are kept in an in-flight set so
//! a redelivered message does not start a second copy. Entries are removed
//! when the task finishes, however it finishes.

use std::sync::Arc;

use cloud_adaptor_core::EventSink;
use cloud_adaptor_core::model::{EventMessage, StepStatus};
use cloud_adaptor_core::persistence::Persistence;
use cloud_adaptor_core::steps;
use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bus::{Delivery, TaskEnvelope, TaskQueues};
use crate::task::{Message, TaskFactory, TaskPayload};

/// Runs tasks delivered by the bus.
pub struct TaskHandler {
    factory: TaskFactory,
    sink: EventSink,
    persistence: Arc<dyn Persistence>,
    in_flight: DashSet<String>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// Removes a task id from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a DashSet<String>,
    task_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.task_id);
    }
}

impl TaskHandler {
    pub fn new(
        factory: TaskFactory,
        persistence: Arc<dyn Persistence>,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            sink: EventSink::new(persistence.clone()),
            persistence,
            in_flight: DashSet::new(),
            tracker,
            cancel,
        }
    }

    /// Start one consumer loop per queue.
    pub fn start(self: &Arc<Self>, queues: TaskQueues) {
        let TaskQueues {
            create,
            init,
            update,
        } = queues;
        self.tracker.spawn(self.clone().run_queue(create));
        self.tracker.spawn(self.clone().run_queue(init));
        self.tracker.spawn(self.clone().run_queue(update));
    }

    /// Number of tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn run_queue<P: TaskPayload>(self: Arc<Self>, mut queue: mpsc::Receiver<Delivery<P>>) {
        let kind = P::KIND;
        info!(kind = %kind, "Task handler started");
        loop {
            let delivery = tokio::select! {
                _ = self.cancel.cancelled() => break,
                delivery = queue.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            let handler = self.clone();
            self.tracker.spawn(async move { handler.handle(delivery).await });
        }
        info!(kind = %kind, "Task handler stopped");
    }

    /// Run one delivery to completion and ack it.
    pub async fn handle<P: TaskPayload>(&self, delivery: Delivery<P>) {
        let (envelope, acker) = delivery.into_parts();
        let TaskEnvelope {
            enterprise_id,
            task_id,
            payload,
        } = envelope;
        let kind = P::KIND;

        if !self.in_flight.insert(task_id.clone()) {
            debug!(task_id = %task_id, kind = %kind, "Task already running here, dropping duplicate");
            acker.ack();
            return;
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            task_id: task_id.clone(),
        };

        match self.persistence.get_task(kind, &enterprise_id, &task_id).await {
            Ok(Some(record)) if record.task_status().is_ok_and(|s| s.is_terminal()) => {
                info!(task_id = %task_id, kind = %kind, status = %record.status, "Task already terminated, skipping");
                acker.ack();
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => debug!(task_id = %task_id, kind = %kind, "Task row not found, running anyway"),
            Err(e) => warn!(task_id = %task_id, error = %e, "Failed to load task row"),
        }

        let task = match self.factory.build(&enterprise_id, payload).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, kind = %kind, error = %e, "Failed to construct task");
                self.record(&EventMessage {
                    enterprise_id,
                    task_id,
                    step_type: steps::CREATE_TASK.to_string(),
                    status: StepStatus::Failure,
                    message: e.to_string(),
                })
                .await;
                acker.ack();
                return;
            }
        };

        info!(task_id = %task_id, enterprise_id = %enterprise_id, kind = %kind, "Task started");
        let (mut messages, body) = task.spawn(self.cancel.child_token());
        let forwarder = {
            let sink = self.sink.clone();
            let (enterprise_id, task_id) = (enterprise_id.clone(), task_id.clone());
            tokio::spawn(async move {
                while let Some(message) = messages.recv().await {
                    if message.is_close() {
                        break;
                    }
                    forward(&sink, &enterprise_id, &task_id, message).await;
                }
            })
        };

        if let Err(e) = body.await {
            error!(task_id = %task_id, error = %e, "Task body aborted");
        }
        if let Err(e) = forwarder.await {
            error!(task_id = %task_id, error = %e, "Event forwarder aborted");
        }
        info!(task_id = %task_id, kind = %kind, "Task finished");
        acker.ack();
    }

    async fn record(&self, event: &EventMessage) {
        if let Err(e) = self.sink.record(event).await {
            error!(task_id = %event.task_id, step = %event.step_type, error = %e, "Failed to record task event");
        }
    }
}

async fn forward(sink: &EventSink, enterprise_id: &str, task_id: &str, message: Message) {
    debug!(
        task_id = %task_id,
        step = %message.step_type,
        status = %message.status,
        message = %message.message,
        "Task step"
    );
    let event = EventMessage {
        enterprise_id: enterprise_id.to_string(),
        task_id: task_id.to_string(),
        step_type: message.step_type,
        status: message.status,
        message: message.message,
    };
    if let Err(e) = sink.record(&event).await {
        error!(task_id = %task_id, step = %event.step_type, error = %e, "Failed to record task event");
    }
}
